use crate::common::{MemorySource, ScriptedEmbedder, TestIndex, axis, chunk, test_settings};
use orthovec::{Candidate, ChunkId, OrthoIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const DIM: usize = 16;

fn random_unit(rng: &mut StdRng) -> Vec<f32> {
    let v: Vec<f32> = (0..DIM).map(|_| rng.random_range(-1.0..1.0)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
    v.into_iter().map(|x| x / norm).collect()
}

fn open(dir: &TempDir, admission: bool) -> Arc<OrthoIndex> {
    let mut settings = test_settings(dir, DIM);
    settings.admission.enabled = admission;
    settings.store.sync_writes = false;
    Arc::new(OrthoIndex::open(&settings, ScriptedEmbedder::new(DIM), MemorySource::new()).unwrap())
}

#[test]
fn test_searches_run_while_writing() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir, false);
    let stop = Arc::new(AtomicBool::new(false));
    let searches = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..4)
        .map(|seed| {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            let searches = Arc::clone(&searches);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                while !stop.load(Ordering::Relaxed) {
                    let query = random_unit(&mut rng);
                    let results = index.search(&query, 5, None).unwrap();
                    assert!(results.len() <= 5);
                    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
                    searches.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(99);
    for i in 0..200 {
        let id = format!("c{i}");
        index
            .admit(Candidate::new(chunk("a.rs", &id, &id), random_unit(&mut rng)))
            .unwrap();
        if i % 3 == 0 {
            index.tombstone(&ChunkId::new(format!("c{}", i / 2))).unwrap();
        }
        if i % 50 == 49 {
            index.rebuild().unwrap();
        }
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(searches.load(Ordering::Relaxed) > 0);
    assert!(index.verify().is_consistent());
}

#[test]
fn test_racing_near_duplicates_admit_only_one() {
    let dir = TempDir::new().unwrap();
    let index = open(&dir, true);

    let mut base = vec![0.0f32; DIM];
    base[0] = 1.0;

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let index = Arc::clone(&index);
            let mut vector = base.clone();
            vector[1] = 0.01 * i as f32;
            thread::spawn(move || {
                let id = format!("dup{i}");
                index
                    .admit(Candidate::new(chunk("race.rs", &id, &id), vector))
                    .unwrap()
                    .is_admitted()
            })
        })
        .collect();

    let admitted = writers
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|admitted| *admitted)
        .count();

    assert_eq!(admitted, 1);
    assert_eq!(index.stats().live_count, 1);
    assert!(index.verify().is_consistent());
}

#[test]
fn test_slow_embedding_does_not_hold_up_other_mutations() {
    let t = TestIndex::new(DIM);
    t.embedder.script("slow chunk", axis(DIM, 0));
    t.embedder.delay_on("slow chunk", Duration::from_millis(800));
    t.source.set("slow.rs", &[("s", "slow chunk")]);

    thread::scope(|scope| {
        let indexing = scope.spawn(|| t.index.index_file(Path::new("slow.rs")));

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        let decision = t
            .index
            .admit(Candidate::new(chunk("fast.rs", "f", "fast"), axis(DIM, 1)))
            .unwrap();
        assert!(decision.is_admitted());
        assert!(started.elapsed() < Duration::from_millis(500));

        let summary = indexing.join().unwrap().unwrap();
        assert_eq!(summary.inserted, 1);
    });

    assert_eq!(t.index.stats().live_count, 2);
    t.assert_consistent();
}

#[test]
fn test_index_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<OrthoIndex>();
}
