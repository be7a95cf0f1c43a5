use anyhow::Context;
use rusqlite::Connection;

// Embedded so in-memory databases get the full schema.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_scheduling_core.sql",
    r#"
    CREATE TABLE IF NOT EXISTS businesses (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL DEFAULT 'UTC',
        staff_scheduling INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS business_hours (
        business_id TEXT NOT NULL REFERENCES businesses(id),
        weekday INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
        open_minute INTEGER NOT NULL DEFAULT 0,
        close_minute INTEGER NOT NULL DEFAULT 0,
        closed INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (business_id, weekday)
    );

    CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        business_id TEXT NOT NULL REFERENCES businesses(id),
        title TEXT NOT NULL,
        duration_minutes INTEGER NOT NULL,
        default_staff_id TEXT,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS staff (
        id TEXT PRIMARY KEY,
        business_id TEXT NOT NULL REFERENCES businesses(id),
        display_name TEXT NOT NULL,
        calendar_ref TEXT
    );

    CREATE TABLE IF NOT EXISTS appointments (
        id TEXT PRIMARY KEY,
        business_id TEXT NOT NULL REFERENCES businesses(id),
        staff_id TEXT,
        service_id TEXT NOT NULL,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'booked',
        customer_name TEXT,
        customer_phone TEXT,
        calendar_ref TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_appointments_window
        ON appointments (business_id, start_at);

    -- Guards the confirm race: two confirmations of the same slot cannot
    -- both commit. Cancelled rows fall out of the index.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_slot
        ON appointments (business_id, IFNULL(staff_id, ''), start_at)
        WHERE status = 'booked';

    CREATE TABLE IF NOT EXISTS appointment_drafts (
        id TEXT PRIMARY KEY,
        business_id TEXT NOT NULL REFERENCES businesses(id),
        service_id TEXT NOT NULL,
        staff_id TEXT,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        customer_name TEXT,
        customer_phone TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conversation_state (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        business_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        session_key TEXT NOT NULL,
        last_intent TEXT,
        context TEXT NOT NULL DEFAULT '{}',
        updated_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        UNIQUE (business_id, channel, session_key)
    );
    "#,
)];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
