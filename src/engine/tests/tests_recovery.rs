//! Restart preservation: close → reopen keeps the live key set.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::tests::helpers::*;

    #[test]
    fn reopen_preserves_flushed_data() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            for i in 0..100 {
                engine.put(&key(i), &value(i)).unwrap();
            }
            engine.flush().unwrap();
            engine.close().unwrap();
        }

        let engine = open_memtable_only(tmp.path());
        for i in 0..100 {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn close_flushes_unflushed_writes_before_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            engine.put(b"a", b"1").unwrap();
            engine.flush().unwrap();
            // Overwrite without flushing; close() must persist it.
            engine.put(b"a", b"2").unwrap();
            assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
            engine.close().unwrap();
        }

        let engine = open_memtable_only(tmp.path());
        assert_eq!(engine.get(b"a").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn deletes_survive_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            engine.put(b"kept", b"v").unwrap();
            engine.put(b"gone", b"v").unwrap();
            engine.flush().unwrap();
            engine.delete(b"gone").unwrap();
            engine.close().unwrap();
        }

        let engine = open_memtable_only(tmp.path());
        assert_eq!(engine.get(b"kept").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.get(b"gone").unwrap(), None);
        let live: Vec<_> = engine.scan(b"", None).unwrap().map(|(k, _)| k).collect();
        assert_eq!(live, vec![b"kept".to_vec()]);
    }

    #[test]
    fn generation_counter_continues_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            engine.put(b"a", b"1").unwrap();
            engine.flush().unwrap();
            engine.put(b"b", b"2").unwrap();
            engine.close().unwrap(); // writes generation 2
        }

        let engine = open_memtable_only(tmp.path());
        assert_eq!(engine.stats().unwrap().generations, vec![2, 1]);
        engine.put(b"c", b"3").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.stats().unwrap().generations, vec![3, 2, 1]);
    }

    #[test]
    fn compacted_state_survives_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            for round in 0..3u32 {
                engine.put(&key(round), &value(round)).unwrap();
                engine.flush().unwrap();
            }
            engine.compact().unwrap();
            engine.close().unwrap();
        }

        let engine = open_memtable_only(tmp.path());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.run_count, 1);
        for i in 0..3 {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn reopen_after_unclean_drop_loses_only_memtable_contents() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open_memtable_only(tmp.path());
            engine.put(b"flushed", b"durable").unwrap();
            engine.flush().unwrap();
            engine.put(b"buffered", b"volatile").unwrap();
            // Dropped without close: no WAL, so the buffered write is
            // gone by design.
            drop(engine);
        }

        let engine = open_memtable_only(tmp.path());
        assert_eq!(engine.get(b"flushed").unwrap(), Some(b"durable".to_vec()));
        assert_eq!(engine.get(b"buffered").unwrap(), None);
    }
}
