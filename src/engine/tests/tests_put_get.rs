//! Put/Get correctness — memtable-only and across flushed runs.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::tests::helpers::*;
    use crate::engine::{EngineError, Entry};
    use crate::memtable::MemtableError;

    #[test]
    fn put_get_single_key() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"hello", b"world").unwrap();
        assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
    }

    #[test]
    fn get_missing_key_returns_none() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        assert_eq!(engine.get(b"nope").unwrap(), None);
    }

    #[test]
    fn later_write_wins() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"a", b"1").unwrap();
        engine.put(b"a", b"3").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn delete_hides_the_key() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"k", b"v").unwrap();
        engine.delete(b"k").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn delete_of_missing_key_is_fine() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.delete(b"never-there").unwrap();
        assert_eq!(engine.get(b"never-there").unwrap(), None);
    }

    #[test]
    fn empty_value_round_trips() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"k", b"").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn empty_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        assert!(matches!(
            engine.put(b"", b"v"),
            Err(EngineError::Memtable(MemtableError::EmptyKey))
        ));
    }

    #[test]
    fn upsert_accepts_raw_entries() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.upsert(Entry::put(b"a", b"1")).unwrap();
        engine.upsert(Entry::tombstone(b"a")).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), None);
    }

    #[test]
    fn get_reads_through_flushed_runs() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"persisted", b"on-disk").unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.stats().unwrap().run_count, 1);
        assert_eq!(
            engine.get(b"persisted").unwrap(),
            Some(b"on-disk".to_vec())
        );
    }

    #[test]
    fn memtable_write_shadows_flushed_value() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"a", b"1").unwrap();
        engine.flush().unwrap();
        engine.put(b"a", b"2").unwrap();

        assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn tombstone_masks_flushed_value() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"k", b"v").unwrap();
        engine.flush().unwrap();
        engine.delete(b"k").unwrap();

        // The tombstone lives in the memtable, the value in a run; the
        // tombstone must mask it, not fall through to it.
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn newer_run_shadows_older_run() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"k", b"old").unwrap();
        engine.flush().unwrap();
        engine.put(b"k", b"new").unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.stats().unwrap().run_count, 2);
        assert_eq!(engine.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
