// Adapted from sov-db's rocks_db_config, itself adapted from Aptos-Core.

use rocksdb::Options;

/// Port of the tuned RocksDB options used across this workspace. See
/// <https://github.com/facebook/rocksdb/blob/master/include/rocksdb/options.h>
/// for a detailed explanation of each field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RocksdbConfig {
    /// The maximum number of files that can be open concurrently.
    pub max_open_files: i32,
    /// Once write-ahead logs exceed this size, RocksDB forces a flush of the
    /// column families backed by the oldest live WAL file.
    pub max_total_wal_size: u64,
    /// The maximum number of background threads for flushing and compaction.
    pub max_background_jobs: i32,
}

impl Default for RocksdbConfig {
    fn default() -> Self {
        Self {
            max_open_files: 5000,
            max_total_wal_size: 1u64 << 30,
            max_background_jobs: 16,
        }
    }
}

/// Generates [`rocksdb::Options`] corresponding to the given [`RocksdbConfig`].
pub fn gen_rocksdb_options(config: &RocksdbConfig, readonly: bool) -> Options {
    let mut db_opts = Options::default();
    db_opts.set_max_open_files(config.max_open_files);
    db_opts.set_max_total_wal_size(config.max_total_wal_size);
    db_opts.set_max_background_jobs(config.max_background_jobs);
    if !readonly {
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_atomic_flush(true);
    }
    db_opts
}
