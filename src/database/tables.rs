pub const CREATE_CONTRACTOR_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS contractor (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        allowance TEXT NOT NULL,
        block_height INTEGER NOT NULL,
        current_period INTEGER NOT NULL
    )";

pub const CREATE_CONTRACTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS contracts (
        id TEXT PRIMARY KEY,
        host_public_key TEXT NOT NULL,
        end_height INTEGER NOT NULL,
        data TEXT NOT NULL
    )";

pub const CREATE_OLD_CONTRACTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS old_contracts (
        id TEXT PRIMARY KEY,
        host_public_key TEXT NOT NULL,
        end_height INTEGER NOT NULL,
        data TEXT NOT NULL
    )";

pub const CREATE_RENEWALS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS renewals (
        old_id TEXT PRIMARY KEY,
        new_id TEXT NOT NULL UNIQUE
    )";

pub const CREATE_RECOVERABLE_CONTRACTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS recoverable_contracts (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )";

pub async fn initialize_database(conn: &libsql::Connection) -> Result<(), libsql::Error> {
    conn.execute(CREATE_CONTRACTOR_TABLE, ()).await?;
    conn.execute(CREATE_CONTRACTS_TABLE, ()).await?;
    conn.execute(CREATE_OLD_CONTRACTS_TABLE, ()).await?;
    conn.execute(CREATE_RENEWALS_TABLE, ()).await?;
    conn.execute(CREATE_RECOVERABLE_CONTRACTS_TABLE, ()).await?;
    conn.query("PRAGMA journal_mode = WAL;", ()).await?;
    conn.query("PRAGMA synchronous = NORMAL;", ()).await?;
    Ok(())
}
