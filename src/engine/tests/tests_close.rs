//! Shutdown semantics: idempotent close, final flush, poisoned calls.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::tests::helpers::*;
    use crate::engine::EngineError;
    use crate::storage::StorageSet;

    #[test]
    fn close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[test]
    fn operations_after_close_fail() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        engine.put(b"k", b"v").unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.get(b"k"), Err(EngineError::Closed)));
        assert!(matches!(engine.put(b"k", b"v"), Err(EngineError::Closed)));
        assert!(matches!(engine.delete(b"k"), Err(EngineError::Closed)));
        assert!(matches!(engine.scan(b"", None), Err(EngineError::Closed)));
        assert!(matches!(engine.flush(), Err(EngineError::Closed)));
        assert!(matches!(engine.compact(), Err(EngineError::Closed)));
        assert!(matches!(engine.stats(), Err(EngineError::Closed)));
    }

    #[test]
    fn close_flushes_the_memtable_to_a_final_run() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        engine.put(b"never-flushed", b"but-durable").unwrap();
        engine.close().unwrap();

        // The data must be on disk: load the directory directly.
        let set = StorageSet::load(tmp.path()).unwrap();
        assert_eq!(set.run_count(), 1);
        let found = set.get(b"never-flushed").unwrap().unwrap();
        assert_eq!(found.value, Some(b"but-durable".to_vec()));
    }

    #[test]
    fn close_of_an_empty_engine_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());
        engine.close().unwrap();

        let set = StorageSet::load(tmp.path()).unwrap();
        assert_eq!(set.run_count(), 0);
    }

    #[test]
    fn close_waits_for_in_flight_background_work() {
        let tmp = TempDir::new().unwrap();
        let engine = open_memtable_only(tmp.path());

        for i in 0..500 {
            engine.put(&key(i), &value(i)).unwrap();
        }
        // Submit the flush without waiting on its completion, write a
        // little more, then close immediately: close must drain the
        // worker and persist the post-freeze writes as well.
        let _in_flight = engine.freeze_and_submit().unwrap();
        for i in 500..600 {
            engine.put(&key(i), &value(i)).unwrap();
        }
        engine.close().unwrap();

        let set = StorageSet::load(tmp.path()).unwrap();
        for i in 0..600 {
            let found = set.get(&key(i)).unwrap().unwrap();
            assert_eq!(found.value, Some(value(i)));
        }
    }
}
