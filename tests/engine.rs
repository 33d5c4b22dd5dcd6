//! End-to-end scenarios over the public API: collection lifecycle, bulk
//! traffic, reopen behavior, rollback visibility, and reader/writer
//! isolation across threads.

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::tempdir;

use dendb::Database;

fn create_test_db() -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db")).unwrap();
    (dir, db)
}

mod lifecycle {
    use super::*;

    #[test]
    fn fresh_database_round_trips_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open(&path).unwrap();
        let mut tx = db.begin_write();
        let mut users = tx.create_collection(b"users").unwrap();
        users.put(&mut tx, b"alice", b"1").unwrap();
        tx.commit().unwrap();
        db.close().unwrap();

        let db = Database::open(&path).unwrap();
        let tx = db.begin_read();
        let users = tx.get_collection(b"users").unwrap().unwrap();
        let item = users.find(&tx, b"alice").unwrap().unwrap();
        assert_eq!(item.key, b"alice");
        assert_eq!(item.value, b"1");
    }

    #[test]
    fn unknown_collection_is_none() {
        let (_dir, db) = create_test_db();

        let tx = db.begin_read();
        assert!(tx.get_collection(b"nothing").unwrap().is_none());
    }

    #[test]
    fn deleted_collection_disappears() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        let mut logs = tx.create_collection(b"logs").unwrap();
        logs.put(&mut tx, b"entry", b"boot").unwrap();
        tx.create_collection(b"stats").unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin_write();
        tx.delete_collection(b"logs").unwrap();
        tx.delete_collection(b"never-existed").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        assert!(tx.get_collection(b"logs").unwrap().is_none());
        assert!(tx.get_collection(b"stats").unwrap().is_some());
    }

    #[test]
    fn collections_with_the_same_keys_stay_independent() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        let mut red = tx.create_collection(b"red").unwrap();
        let mut blue = tx.create_collection(b"blue").unwrap();
        red.put(&mut tx, b"color", b"red").unwrap();
        blue.put(&mut tx, b"color", b"blue").unwrap();
        red.remove(&mut tx, b"missing").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        let red = tx.get_collection(b"red").unwrap().unwrap();
        let blue = tx.get_collection(b"blue").unwrap().unwrap();
        assert_eq!(red.find(&tx, b"color").unwrap().unwrap().value, b"red");
        assert_eq!(blue.find(&tx, b"color").unwrap().unwrap().value, b"blue");
    }

    #[test]
    fn split_trees_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::builder()
            .path(&path)
            .page_size(128)
            .open()
            .unwrap();
        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();
        for i in 0..36u32 {
            let key = format!("{:02}", i);
            data.put(&mut tx, key.as_bytes(), b"xxxx").unwrap();
        }
        tx.commit().unwrap();
        db.close().unwrap();

        let db = Database::builder()
            .path(&path)
            .page_size(128)
            .open()
            .unwrap();
        let tx = db.begin_read();
        let data = tx.get_collection(b"data").unwrap().unwrap();
        for i in 0..36u32 {
            let key = format!("{:02}", i);
            let found = data.find(&tx, key.as_bytes()).unwrap();
            assert!(found.is_some(), "lost key {key} across reopen");
        }
    }
}

mod bulk {
    use super::*;

    #[test]
    fn ten_thousand_keys_read_back_correctly() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();

        // Insert in a scrambled but deterministic order.
        for i in 0..10_000u64 {
            let k = (i * 48_271) % 10_000;
            let key = format!("k{:06}", k);
            data.put(&mut tx, key.as_bytes(), key.as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        let tx = db.begin_read();
        let data = tx.get_collection(b"data").unwrap().unwrap();
        for i in 0..10_000u64 {
            let key = format!("k{:06}", i);
            let found = data.find(&tx, key.as_bytes()).unwrap().unwrap();
            assert_eq!(found.value, key.as_bytes());
        }

        assert!(data.find(&tx, b"k010000").unwrap().is_none());
        assert!(data.find(&tx, b"j000000").unwrap().is_none());
    }

    #[test]
    fn overwrites_and_deletes_apply_in_order() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();
        for i in 0..500u32 {
            let key = format!("key{:03}", i);
            data.put(&mut tx, key.as_bytes(), b"first").unwrap();
        }
        for i in (0..500u32).step_by(2) {
            let key = format!("key{:03}", i);
            data.put(&mut tx, key.as_bytes(), b"second").unwrap();
        }
        for i in (0..500u32).step_by(5) {
            let key = format!("key{:03}", i);
            data.remove(&mut tx, key.as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        let tx = db.begin_read();
        let data = tx.get_collection(b"data").unwrap().unwrap();
        for i in 0..500u32 {
            let key = format!("key{:03}", i);
            let found = data.find(&tx, key.as_bytes()).unwrap();
            if i % 5 == 0 {
                assert!(found.is_none(), "key {key} should have been removed");
            } else if i % 2 == 0 {
                assert_eq!(found.unwrap().value, b"second");
            } else {
                assert_eq!(found.unwrap().value, b"first");
            }
        }
    }
}

mod rollback {
    use super::*;

    #[test]
    fn rolled_back_writes_are_invisible() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        tx.create_collection(b"data").unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin_write();
        let mut data = tx.get_collection(b"data").unwrap().unwrap();
        data.put(&mut tx, b"x", b"y").unwrap();
        tx.rollback();

        let tx = db.begin_read();
        let data = tx.get_collection(b"data").unwrap().unwrap();
        assert!(data.find(&tx, b"x").unwrap().is_none());
    }

    #[test]
    fn commit_after_a_rollback_starts_clean() {
        let (_dir, db) = create_test_db();

        let mut tx = db.begin_write();
        tx.create_collection(b"data").unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin_write();
        let mut data = tx.get_collection(b"data").unwrap().unwrap();
        data.put(&mut tx, b"discarded", b"1").unwrap();
        tx.rollback();

        let mut tx = db.begin_write();
        let mut data = tx.get_collection(b"data").unwrap().unwrap();
        data.put(&mut tx, b"kept", b"2").unwrap();
        tx.commit().unwrap();

        let tx = db.begin_read();
        let data = tx.get_collection(b"data").unwrap().unwrap();
        assert!(data.find(&tx, b"discarded").unwrap().is_none());
        assert_eq!(data.find(&tx, b"kept").unwrap().unwrap().value, b"2");
    }
}

mod isolation {
    use super::*;

    #[test]
    fn a_reader_keeps_its_view_while_a_writer_waits() {
        let (_dir, db) = create_test_db();
        let mut tx = db.begin_write();
        let mut users = tx.create_collection(b"users").unwrap();
        users.put(&mut tx, b"alice", b"1").unwrap();
        tx.commit().unwrap();

        let db = Arc::new(db);
        let barrier = Arc::new(Barrier::new(2));

        let reader = {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let tx = db.begin_read();
                let users = tx.get_collection(b"users").unwrap().unwrap();
                assert_eq!(users.find(&tx, b"alice").unwrap().unwrap().value, b"1");

                // Let the writer start; it must block behind this reader.
                barrier.wait();
                thread::sleep(std::time::Duration::from_millis(50));

                assert_eq!(users.find(&tx, b"alice").unwrap().unwrap().value, b"1");
            })
        };

        let writer = {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut tx = db.begin_write();
                let mut users = tx.get_collection(b"users").unwrap().unwrap();
                users.put(&mut tx, b"alice", b"2").unwrap();
                tx.commit().unwrap();
            })
        };

        reader.join().unwrap();
        writer.join().unwrap();

        let tx = db.begin_read();
        let users = tx.get_collection(b"users").unwrap().unwrap();
        assert_eq!(users.find(&tx, b"alice").unwrap().unwrap().value, b"2");
    }

    #[test]
    fn writers_are_serialized() {
        let (_dir, db) = create_test_db();
        let mut tx = db.begin_write();
        let mut counters = tx.create_collection(b"counters").unwrap();
        counters.put(&mut tx, b"total", b"0").unwrap();
        tx.commit().unwrap();

        let db = Arc::new(db);
        let mut handles = Vec::new();
        for _ in 0..2 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let mut tx = db.begin_write();
                    let mut counters = tx.get_collection(b"counters").unwrap().unwrap();
                    let current = counters.find(&tx, b"total").unwrap().unwrap();
                    let value: u64 = String::from_utf8(current.value).unwrap().parse().unwrap();
                    counters
                        .put(&mut tx, b"total", (value + 1).to_string().as_bytes())
                        .unwrap();
                    tx.commit().unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let tx = db.begin_read();
        let counters = tx.get_collection(b"counters").unwrap().unwrap();
        let total = counters.find(&tx, b"total").unwrap().unwrap();
        assert_eq!(total.value, b"100");
    }

    #[test]
    fn concurrent_readers_share_the_database() {
        let (_dir, db) = create_test_db();
        let mut tx = db.begin_write();
        let mut data = tx.create_collection(b"data").unwrap();
        for i in 0..100u32 {
            let key = format!("key{:03}", i);
            data.put(&mut tx, key.as_bytes(), key.as_bytes()).unwrap();
        }
        tx.commit().unwrap();

        let db = Arc::new(db);
        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let tx = db.begin_read();
                let data = tx.get_collection(b"data").unwrap().unwrap();
                for i in 0..100u32 {
                    let key = format!("key{:03}", i);
                    assert!(data.find(&tx, key.as_bytes()).unwrap().is_some());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
