//! Forward table lifecycle manager.
//!
//! Opens the `forward_params` map pinned by the XDP load balancer and applies
//! inserts, deletes and scans to it. The handle is acquired at most once per
//! controller and kept until the controller is dropped.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use aya::maps::{HashMap, Map, MapData};
use tracing::{debug, info};

use crate::codec;
use crate::error::{Error, Result};
use xdp_lbmap_common::*;

// ---------------------------------------------------------------------------
// Table Seam
// ---------------------------------------------------------------------------

/// Operations the controller needs from the shared kernel table.
pub trait ForwardTable: Send {
    /// Insert or overwrite the entry at `key`.
    fn insert(&mut self, key: FingerprintKey, entry: ForwardEntry) -> anyhow::Result<()>;

    /// Remove the entry at `key`. A missing key is an error.
    fn remove(&mut self, key: &FingerprintKey) -> anyhow::Result<()>;

    /// Scan every populated entry. Order is whatever the table yields.
    fn entries(&self) -> anyhow::Result<Vec<(FingerprintKey, ForwardEntry)>>;
}

/// Opens a `ForwardTable` by pin path.
pub trait TableSource: Send + 'static {
    type Table: ForwardTable + 'static;

    fn open(&self, path: &Path) -> anyhow::Result<Self::Table>;
}

/// The forward table as seen through aya.
pub type PinnedForwardTable = HashMap<MapData, FingerprintKey, ForwardEntry>;

/// Opens tables pinned in bpffs.
#[derive(Debug, Default, Clone, Copy)]
pub struct PinnedTables;

impl TableSource for PinnedTables {
    type Table = PinnedForwardTable;

    fn open(&self, path: &Path) -> anyhow::Result<Self::Table> {
        let data = MapData::from_pin(path)
            .with_context(|| format!("opening pinned map {}", path.display()))?;

        // Checks key and value sizes against the pinned map.
        let table: PinnedForwardTable = Map::HashMap(data)
            .try_into()
            .with_context(|| format!("{} map type mismatch", MAP_FORWARD_PARAMS))?;

        Ok(table)
    }
}

impl ForwardTable for PinnedForwardTable {
    fn insert(&mut self, key: FingerprintKey, entry: ForwardEntry) -> anyhow::Result<()> {
        HashMap::insert(self, key, entry, 0).context("bpf_map_update_elem")
    }

    fn remove(&mut self, key: &FingerprintKey) -> anyhow::Result<()> {
        HashMap::remove(self, key).context("bpf_map_delete_elem")
    }

    fn entries(&self) -> anyhow::Result<Vec<(FingerprintKey, ForwardEntry)>> {
        let mut entries = Vec::new();
        for item in self.iter() {
            entries.push(item.context("bpf_map_get_next_key")?);
        }
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Public Interface
// ---------------------------------------------------------------------------

/// One populated slot of the forward table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub token: FingerprintKey,
    pub entry: ForwardEntry,
}

impl TableEntry {
    pub fn address(&self) -> String {
        codec::decode_address(self.entry.daddr)
    }

    pub fn port(&self) -> u16 {
        codec::decode_port(self.entry.dport)
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}:{}",
            codec::encode_token(&self.token),
            self.address(),
            self.port()
        )
    }
}

struct Loaded<T> {
    path: PathBuf,
    table: T,
}

/// Owns the single handle to the forward table.
pub struct MapController<S: TableSource = PinnedTables> {
    source: S,
    loaded: Option<Loaded<S::Table>>,
}

impl MapController<PinnedTables> {
    /// A controller that opens tables pinned in bpffs.
    pub fn pinned() -> Self {
        Self::new(PinnedTables)
    }
}

impl<S: TableSource> MapController<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            loaded: None,
        }
    }

    /// Acquire the table pinned at `path`.
    ///
    /// Fails with `AlreadyLoaded` if a table is already held; the held handle
    /// is left untouched. A failed load leaves the controller unloaded so the
    /// call can be retried.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(loaded) = &self.loaded {
            return Err(Error::AlreadyLoaded {
                path: loaded.path.clone(),
            });
        }

        let table = self.source.open(path).map_err(|e| Error::LoadFailed {
            path: path.to_path_buf(),
            source: e.into(),
        })?;

        info!(
            map = %path.display(),
            layout_version = FORWARD_TABLE_LAYOUT_VERSION,
            "loaded pinned forward table"
        );

        self.loaded = Some(Loaded {
            path: path.to_path_buf(),
            table,
        });
        Ok(())
    }

    /// Pin path of the held table, if any.
    pub fn path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|l| l.path.as_path())
    }

    /// Every populated destination in the table.
    pub fn get(&self) -> Result<Vec<ForwardEntry>> {
        Ok(self.list()?.into_iter().map(|e| e.entry).collect())
    }

    /// Every populated slot in the table, with its key.
    pub fn list(&self) -> Result<Vec<TableEntry>> {
        let table = self.table()?;
        let entries = table
            .entries()
            .map_err(|e| Error::ReadFailed { source: e.into() })?;

        let entries: Vec<TableEntry> = entries
            .into_iter()
            .map(|(token, entry)| TableEntry { token, entry })
            .collect();

        debug!(entries = entries.len(), "scanned forward table");
        Ok(entries)
    }

    /// Upsert the destination for `token`.
    ///
    /// Nothing is written unless the token, address and port all decode.
    pub fn insert(&mut self, address: &str, port: &str, token: &str) -> Result<()> {
        let table = self.table_mut()?;

        let key = codec::decode_token(token).map_err(|source| Error::BadToken {
            token: token.to_string(),
            source,
        })?;
        let daddr = codec::encode_address(address).map_err(|source| Error::BadAddress {
            address: address.to_string(),
            source,
        })?;
        let dport = codec::encode_port(port).map_err(|source| Error::BadPort {
            port: port.to_string(),
            source,
        })?;

        let entry = ForwardEntry::new(daddr, dport);
        table.insert(key, entry).map_err(|e| Error::WriteFailed {
            token: codec::encode_token(&key),
            source: e.into(),
        })?;

        info!(
            token = %codec::encode_token(&key),
            address = address.trim(),
            port = codec::decode_port(dport),
            "inserted forward entry"
        );
        Ok(())
    }

    /// Fill keys `(i, j, 0, 0, 0, 0, 0, 0)` for every `i <= 255`, `j <= 15`
    /// with the placeholder destination.
    ///
    /// Stops at the first failed write; entries already written stay.
    pub fn batch_insert(&mut self) -> Result<()> {
        let table = self.table_mut()?;

        let mut key: FingerprintKey = [0; TOKEN_LEN];
        let mut written = 0u32;
        for i in 0..=BATCH_OUTER {
            key[0] = i;
            for j in 0..=BATCH_INNER {
                key[1] = j;
                table
                    .insert(key, BATCH_PLACEHOLDER)
                    .map_err(|e| Error::WriteFailed {
                        token: codec::encode_token(&key),
                        source: e.into(),
                    })?;
                debug!(token = %codec::encode_token(&key), "inserted placeholder entry");
                written += 1;
            }
        }

        info!(entries = written, "batch insert complete");
        Ok(())
    }

    /// Remove the entry for `token`.
    pub fn delete(&mut self, token: &str) -> Result<()> {
        let table = self.table_mut()?;

        let key = codec::decode_token(token).map_err(|source| Error::BadToken {
            token: token.to_string(),
            source,
        })?;

        table.remove(&key).map_err(|e| Error::DeleteFailed {
            token: codec::encode_token(&key),
            source: e.into(),
        })?;

        info!(token = %codec::encode_token(&key), "deleted forward entry");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private
    // -----------------------------------------------------------------------

    fn table(&self) -> Result<&S::Table> {
        self.loaded
            .as_ref()
            .map(|l| &l.table)
            .ok_or(Error::NotLoaded)
    }

    fn table_mut(&mut self) -> Result<&mut S::Table> {
        self.loaded
            .as_mut()
            .map(|l| &mut l.table)
            .ok_or(Error::NotLoaded)
    }
}

// ---------------------------------------------------------------------------
// In-memory table for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::Path;

    use anyhow::bail;

    use super::*;

    /// Behaves like a BPF hash map of fixed capacity.
    #[derive(Debug, Default)]
    pub struct MemoryTable {
        pub entries: HashMap<FingerprintKey, ForwardEntry>,
        pub fail_writes_after: Option<usize>,
        writes: usize,
    }

    impl ForwardTable for MemoryTable {
        fn insert(&mut self, key: FingerprintKey, entry: ForwardEntry) -> anyhow::Result<()> {
            if let Some(limit) = self.fail_writes_after {
                if self.writes >= limit {
                    bail!("bpf_map_update_elem: injected failure");
                }
            }
            if !self.entries.contains_key(&key)
                && self.entries.len() >= FORWARD_TABLE_MAX_ENTRIES as usize
            {
                bail!("bpf_map_update_elem: Argument list too long (os error 7)");
            }
            self.writes += 1;
            self.entries.insert(key, entry);
            Ok(())
        }

        fn remove(&mut self, key: &FingerprintKey) -> anyhow::Result<()> {
            match self.entries.remove(key) {
                Some(_) => Ok(()),
                None => bail!("the key was not found"),
            }
        }

        fn entries(&self) -> anyhow::Result<Vec<(FingerprintKey, ForwardEntry)>> {
            Ok(self.entries.iter().map(|(k, v)| (*k, *v)).collect())
        }
    }

    /// Opens a fresh `MemoryTable` for any path under `/sys/fs/bpf`.
    #[derive(Debug, Default)]
    pub struct MemorySource {
        pub fail_writes_after: Option<usize>,
    }

    impl TableSource for MemorySource {
        type Table = MemoryTable;

        fn open(&self, path: &Path) -> anyhow::Result<Self::Table> {
            if !path.starts_with("/sys/fs/bpf") {
                bail!("No such file or directory (os error 2)");
            }
            Ok(MemoryTable {
                fail_writes_after: self.fail_writes_after,
                ..Default::default()
            })
        }
    }

    pub const TEST_PIN: &str = "/sys/fs/bpf/test/forward_params";

    pub fn loaded_controller() -> MapController<MemorySource> {
        let mut controller = MapController::new(MemorySource::default());
        controller.load(TEST_PIN).unwrap();
        controller
    }
}
