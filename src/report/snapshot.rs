//! Snapshot of the orders of a report still in flight.
//!
//! Written before the orders are handed to the handler and removed once their
//! report was delivered, so a crash in between leaves a trace of what was
//! being worked on.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::intake::Order;

/// Name of the snapshot file inside the data directory.
pub const SNAPSHOT_FILE: &str = "ordenes_tmp.json";

/// Handle on the snapshot file.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Location of the file
    path: PathBuf,
}

impl Snapshot {
    /// Returns the path of the file
    pub const fn as_path(&self) -> &PathBuf {
        &self.path
    }

    /// Removes the snapshot. A missing file is not an error.
    pub fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(self.io(err)),
            _ => Ok(()),
        }
    }

    /// Wraps an I/O error with the path.
    fn io(&self, source: io::Error) -> Error {
        Error::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads the snapshot, if one exists.
    pub fn load(&self) -> Result<Option<Vec<Order>>, Error> {
        match fs::read(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io(err)),
        }
    }

    /// Creates a handle on the snapshot kept in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(SNAPSHOT_FILE),
        }
    }

    /// Replaces the snapshot with `orders`.
    pub fn write(&self, orders: &[Order]) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|err| self.io(err))?;
        }
        let content = serde_json::to_vec_pretty(orders)?;
        fs::write(&self.path, content).map_err(|err| self.io(err))
    }
}

/// Errors that may occur while handling the snapshot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file could not be read or written.
    #[error("snapshot {}: {source}", path.display())]
    Io {
        /// Snapshot path
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// The file does not hold a list of orders.
    #[error("invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{Error, Snapshot};
    use crate::fetch::MessageToken;
    use crate::intake::Order;

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn write_load_clear() -> Result<(), Error> {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path().join("data"));
        let orders = vec![Order {
            fecha_aut: Some("05/06/2024".to_owned()),
            fecha_orden: None,
            numero: "12345".to_owned(),
            proveedor: None,
            tarea: Some("88".to_owned()),
            token: MessageToken::new("UID9"),
        }];

        assert_eq!(snapshot.load()?, None);
        snapshot.write(&orders)?;
        assert_eq!(snapshot.load()?, Some(orders));

        snapshot.clear()?;
        assert_eq!(snapshot.load()?, None);
        snapshot.clear()?;
        Ok(())
    }

    #[test]
    #[expect(clippy::unwrap_used, reason = "test")]
    fn garbage_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path());
        fs::write(snapshot.as_path(), "not json").unwrap();

        assert!(matches!(snapshot.load(), Err(Error::Json(_))));
    }
}
