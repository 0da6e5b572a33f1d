//! Concurrent readers and writers against one memtable.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use crate::engine::Entry;
    use crate::memtable::Memtable;

    #[test]
    fn parallel_writers_disjoint_keys() {
        let memtable = Arc::new(Memtable::new(usize::MAX));
        let mut handles = Vec::new();

        for writer in 0..4u32 {
            let memtable = Arc::clone(&memtable);
            handles.push(thread::spawn(move || {
                for i in 0..250u32 {
                    let key = format!("w{writer}-{i:04}");
                    memtable
                        .put(Entry::put(key.as_bytes(), b"payload"))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(memtable.values().len(), 1000);
        for writer in 0..4u32 {
            for i in 0..250u32 {
                let key = format!("w{writer}-{i:04}");
                assert!(memtable.get(key.as_bytes()).is_some(), "missing {key}");
            }
        }
    }

    #[test]
    fn readers_run_while_writers_insert() {
        let memtable = Arc::new(Memtable::new(usize::MAX));

        let writer = {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for i in 0..2000u32 {
                    let key = format!("key-{i:06}");
                    memtable.put(Entry::put(key.as_bytes(), b"v")).unwrap();
                }
            })
        };

        let reader = {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                // Scans must always see keys in strictly ascending
                // order, whatever prefix of the writes they observe.
                for _ in 0..50 {
                    let snapshot = memtable.scan(b"", None);
                    for pair in snapshot.windows(2) {
                        assert!(pair[0].key < pair[1].key);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(memtable.values().len(), 2000);
    }

    #[test]
    fn last_writer_wins_per_key() {
        let memtable = Arc::new(Memtable::new(usize::MAX));
        let mut handles = Vec::new();

        for writer in 0..4u32 {
            let memtable = Arc::clone(&memtable);
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    memtable
                        .put(Entry::put(b"contended", writer.to_le_bytes()))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Some writer's value must have survived intact.
        let survivor = memtable.get(b"contended").unwrap();
        let value = survivor.value.unwrap();
        assert_eq!(value.len(), 4);
        assert!(u32::from_le_bytes(value.try_into().unwrap()) < 4);
    }
}
