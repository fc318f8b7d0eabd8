//!  Storage is organized around a key-value store ([store::KeyValueStore]).
//!  The basic idea is:
//!   - Every period key (day, week, month) names one bucket.
//!   - A bucket holds tab counters and the time spent during that period.
//!   - Buckets are written in batches, a batch is applied entirely or not at all.

pub mod entities;
pub mod file_store;
pub mod query;
pub mod store;
