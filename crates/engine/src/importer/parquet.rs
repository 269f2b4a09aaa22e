//! Columnar-binary source, loaded natively by the store.

use crate::error::ImportError;
use crate::registry::CancelToken;
use crate::store::{execute_interruptible, quote_ident, quote_literal, Store};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const MAGIC: &[u8; 4] = b"PAR1";

pub fn check_magic(path: &Path) -> Result<(), ImportError> {
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let n = file.read(&mut head)?;
    if n < MAGIC.len() || &head != MAGIC {
        return Err(ImportError::UnsupportedFormat(format!(
            "{} is not a parquet file",
            path.display()
        )));
    }
    Ok(())
}

/// Load `path` into `staging` with one scan of the file, returning the row
/// count. The store reads row groups in parallel; cancelling interrupts the
/// statement midway.
pub fn stage(
    store: &Store,
    path: &Path,
    staging: &str,
    cancel: &CancelToken,
) -> Result<u64, ImportError> {
    check_magic(path)?;
    if cancel.is_cancelled() {
        return Err(ImportError::Cancelled);
    }
    let conn = store.lock()?;
    let loaded = execute_interruptible(
        &conn,
        &format!(
            "CREATE TABLE {} AS SELECT * FROM read_parquet({})",
            quote_ident(staging),
            quote_literal(&path.to_string_lossy())
        ),
        cancel,
    );
    match loaded {
        Err(_) if cancel.is_cancelled() => return Err(ImportError::Cancelled),
        Err(e) => return Err(e.into()),
        Ok(()) => {}
    }
    let rows: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {}", quote_ident(staging)),
        [],
        |row| row.get(0),
    )?;
    tracing::debug!(rows, "parquet source staged");
    Ok(rows.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stage_keeps_every_source_column() {
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.parquet");
        store
            .lock()
            .unwrap()
            .execute_batch(&format!(
                "COPY (SELECT range AS file_row_number, 'r' || range AS label FROM range(5)) TO {} (FORMAT PARQUET)",
                quote_literal(&path.to_string_lossy())
            ))
            .unwrap();

        let rows = stage(&store, &path, "staged", &CancelToken::new()).unwrap();
        assert_eq!(rows, 5);
        let (sum, last): (i64, String) = store
            .lock()
            .unwrap()
            .query_row(
                "SELECT sum(file_row_number)::BIGINT, max(label) FROM staged",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((sum, last.as_str()), (10, "r4"));
    }

    #[test]
    fn test_cancelled_before_scan() {
        let store = Store::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.parquet");
        store
            .lock()
            .unwrap()
            .execute_batch(&format!(
                "COPY (SELECT 1 AS one) TO {} (FORMAT PARQUET)",
                quote_literal(&path.to_string_lossy())
            ))
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(stage(&store, &path, "staged", &cancel), Err(ImportError::Cancelled)));
    }

    #[test]
    fn test_magic_rejects_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"id,name\n1,a\n").unwrap();
        assert!(matches!(check_magic(file.path()), Err(ImportError::UnsupportedFormat(_))));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(check_magic(empty.path()), Err(ImportError::UnsupportedFormat(_))));
    }
}
