use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rocksdb::{
    BlockBasedOptions, Cache, Direction, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions, TransactionOptions, WriteOptions,
};

use crate::runtime::cancel::CancelToken;
use crate::runtime::codec::Encoder;

/// ===== Cache / open-time tuning =====
/// LRU block cache size (data + index/filter blocks).
pub const BLOCK_CACHE_BYTES: usize = 1 << 30; // 1 GiB

/// Bloom filter bits/key (helps point lookups).
pub const BLOOM_BITS_PER_KEY: f64 = 10.0;

/// Log a progress line every this many scanned entries when a scan is run
/// with `log_entries` enabled.
const SCAN_LOG_INTERVAL: usize = 100_000;

/// Tells a scan whether to keep walking. Early termination is expressed in
/// the type so it can never be confused with a real error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Namespaced handle over a transactional RocksDB instance. All keys pass
/// through `prefixed` so several subsystems can share one physical DB.
#[derive(Clone)]
pub struct Kv {
    db: Arc<TransactionDB>,
    prefix: Vec<u8>,
    encoder: Encoder,
}

impl Kv {
    /// Open (creating if missing) at `path`, namespaced under `prefix`.
    pub fn open(path: impl AsRef<Path>, prefix: impl AsRef<[u8]>) -> Result<Self> {
        Self::open_with_cache(path, prefix, BLOCK_CACHE_BYTES)
    }

    pub fn open_with_cache(
        path: impl AsRef<Path>,
        prefix: impl AsRef<[u8]>,
        cache_bytes: usize,
    ) -> Result<Self> {
        let cache = Cache::new_lru_cache(cache_bytes);

        let mut table = BlockBasedOptions::default();
        table.set_block_cache(&cache);
        // Hot metadata lives in the cache; pin L0 for recent data.
        table.set_cache_index_and_filter_blocks(true);
        table.set_pin_l0_filter_and_index_blocks_in_cache(true);
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, false);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        // Keep readers open (avoid fd thrash)
        opts.set_max_open_files(-1);
        opts.set_block_based_table_factory(&table);

        let txn_opts = TransactionDBOptions::default();
        let db = TransactionDB::open(&opts, &txn_opts, path.as_ref())
            .with_context(|| format!("failed to open store at {}", path.as_ref().display()))?;

        Ok(Self { db: Arc::new(db), prefix: prefix.as_ref().to_vec(), encoder: Encoder })
    }

    pub fn from_db(db: Arc<TransactionDB>, prefix: impl AsRef<[u8]>) -> Self {
        Self { db, prefix: prefix.as_ref().to_vec(), encoder: Encoder }
    }

    #[inline]
    pub fn prefixed(&self, k: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + k.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(k);
        out
    }

    #[inline]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    #[inline]
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Begin a transaction. Read-only transactions take a snapshot so
    /// readers are isolated from concurrent writers; writable transactions
    /// stage mutations until `commit`.
    pub fn transaction(&self, writable: bool) -> KvTransaction<'_> {
        let mut topts = TransactionOptions::default();
        topts.set_snapshot(!writable);
        let wopts = WriteOptions::default();
        KvTransaction { kv: self, inner: self.db.transaction_opt(&wopts, &topts), writable }
    }
}

/// A single transaction over the namespaced keyspace. Dropping an
/// uncommitted transaction rolls it back, so every early-return error path
/// discards automatically.
pub struct KvTransaction<'db> {
    kv: &'db Kv,
    inner: Transaction<'db, TransactionDB>,
    writable: bool,
}

impl<'db> KvTransaction<'db> {
    #[inline]
    pub fn encoder(&self) -> &Encoder {
        self.kv.encoder()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.get(self.kv.prefixed(key))?)
    }

    /// Stage a write. Taking the value by `Vec` hands the buffer to the
    /// transaction outright.
    pub fn set(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if !self.writable {
            bail!("set on read-only transaction");
        }
        Ok(self.inner.put(self.kv.prefixed(key), value)?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if !self.writable {
            bail!("delete on read-only transaction");
        }
        Ok(self.inner.delete(self.kv.prefixed(key))?)
    }

    /// Walk keys under `prefix` starting from `seek_to`, in lexicographic
    /// order (or reverse). The callback sees keys relative to the store
    /// namespace and borrowed value buffers; return `ScanControl::Stop` to
    /// halt early. Returns the number of entries visited.
    ///
    /// Scans observe the transaction's own uncommitted writes.
    pub fn scan(
        &self,
        ctx: &CancelToken,
        prefix: &[u8],
        seek_to: &[u8],
        reverse: bool,
        log_entries: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> Result<ScanControl>,
    ) -> Result<usize> {
        let ns_prefix = self.kv.prefixed(prefix);
        let ns_seek = self.kv.prefixed(seek_to);
        let direction = if reverse { Direction::Reverse } else { Direction::Forward };
        let iter = self.inner.iterator(IteratorMode::From(&ns_seek, direction));

        let mut entries = 0usize;
        for item in iter {
            ctx.check()?;
            let (k, v) = item.context("store scan failed")?;
            if !k.starts_with(&ns_prefix) {
                break;
            }

            entries += 1;
            if log_entries && entries % SCAN_LOG_INTERVAL == 0 {
                eprintln!("[kv] scanned {entries} entries");
            }

            let rel = &k[self.kv.prefix().len()..];
            if f(rel, &v)? == ScanControl::Stop {
                break;
            }
        }

        Ok(entries)
    }

    /// Make all staged writes durable. Consumes the transaction.
    pub fn commit(self, ctx: &CancelToken) -> Result<()> {
        ctx.check()?;
        self.inner.commit().context("transaction commit failed")
    }

    /// Throw away all staged writes. Dropping does the same; this exists
    /// for call sites that want the discard to be explicit.
    pub fn discard(self) {
        let _ = self.inner.rollback();
    }
}
