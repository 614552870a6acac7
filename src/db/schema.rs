//! Schema as const DDL strings executed in order at startup.

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                  INTEGER PRIMARY KEY,
        language            TEXT NOT NULL DEFAULT 'en',
        balance_cents       INTEGER NOT NULL DEFAULT 0,
        lifetime_purchases  INTEGER NOT NULL DEFAULT 0,
        is_reseller         INTEGER NOT NULL DEFAULT 0,
        is_banned           INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        city            TEXT NOT NULL,
        district        TEXT NOT NULL,
        product_type    TEXT NOT NULL,
        size            TEXT NOT NULL,
        unit_price_cents INTEGER NOT NULL,
        description     TEXT NOT NULL DEFAULT '',
        media_json      TEXT NOT NULL DEFAULT '[]',
        available       INTEGER NOT NULL DEFAULT 1,
        reserved        INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_products_browse ON products (city, district, available, reserved)",
    "CREATE INDEX IF NOT EXISTS idx_products_type ON products (product_type)",
    r#"
    CREATE TABLE IF NOT EXISTS basket_holds (
        user_id     INTEGER NOT NULL,
        product_id  INTEGER NOT NULL,
        inserted_at TEXT NOT NULL,
        PRIMARY KEY (product_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_basket_holds_user ON basket_holds (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS pending_payments (
        provider_payment_id    TEXT PRIMARY KEY,
        user_id                INTEGER NOT NULL,
        target_eur_cents       INTEGER NOT NULL,
        expected_crypto_amount TEXT NOT NULL,
        crypto_currency        TEXT NOT NULL,
        created_at             TEXT NOT NULL,
        kind                   TEXT NOT NULL,
        basket_snapshot_json   TEXT,
        discount_code          TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS discount_codes (
        code        TEXT PRIMARY KEY,
        kind        TEXT NOT NULL,
        value       TEXT NOT NULL,
        max_uses    INTEGER,
        uses_count  INTEGER NOT NULL DEFAULT 0,
        expires_at  TEXT,
        active      INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reseller_discount_rules (
        reseller_user_id INTEGER NOT NULL,
        product_type     TEXT NOT NULL,
        percentage       TEXT NOT NULL,
        PRIMARY KEY (reseller_user_id, product_type)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS purchase_records (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id         INTEGER NOT NULL,
        product_id      INTEGER NOT NULL,
        product_type    TEXT NOT NULL,
        city            TEXT NOT NULL,
        district        TEXT NOT NULL,
        size            TEXT NOT NULL,
        name            TEXT NOT NULL,
        paid_price_cents INTEGER NOT NULL,
        created_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reviews (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        purchase_record_id  INTEGER NOT NULL,
        user_id             INTEGER NOT NULL,
        rating              INTEGER NOT NULL,
        text                TEXT NOT NULL DEFAULT '',
        created_at          TEXT NOT NULL,
        UNIQUE (purchase_record_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_action_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        admin_user_id   INTEGER NOT NULL,
        action          TEXT NOT NULL,
        detail          TEXT NOT NULL DEFAULT '',
        created_at      TEXT NOT NULL
    )
    "#,
];
