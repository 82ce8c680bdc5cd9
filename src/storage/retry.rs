use std::time::Duration;

use rusqlite::{Connection, ErrorCode};

const MAX_RETRIES: u32 = 3;
const BACKOFF_MILLIS: &[u64] = &[50, 100, 200];

/// Check if a rusqlite error means another connection holds the lock.
/// `busy_timeout` already waits inside SQLite; this catches what outlasts it.
pub fn is_busy_error(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Run a writer operation, retrying with backoff while the database is busy.
///
/// Runs on the connection's own thread, so blocking here only delays
/// queued calls on the same connection. `op` must be a whole transaction:
/// a failed attempt has been rolled back before it is retried.
pub fn with_busy_retry<T, F>(conn: &mut Connection, mut op: F) -> Result<T, rusqlite::Error>
where
    F: FnMut(&mut Connection) -> Result<T, rusqlite::Error>,
{
    let mut attempt: u32 = 0;
    loop {
        match op(conn) {
            Err(e) if is_busy_error(&e) && attempt < MAX_RETRIES => {
                let wait = BACKOFF_MILLIS
                    .get(attempt as usize)
                    .copied()
                    .unwrap_or(200);
                log::warn!(
                    "Database busy. Waiting {wait}ms before retry {}/{}",
                    attempt + 1,
                    MAX_RETRIES
                );
                std::thread::sleep(Duration::from_millis(wait));
                attempt += 1;
            }
            result => return result,
        }
    }
}
