//! Benchmarks for vector search and retrieval.
//!
//! Uses 1,000 chunks by default. Set `BENCH_FULL_SCALE=1` to index 50,000
//! chunks instead:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p docqa-vector
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use docqa_core::types::Chunk;
use docqa_vector::embedding::{EmbeddingService, MockEmbedding};
use docqa_vector::index::VectorIndex;
use docqa_vector::retriever::Retriever;

const CI_CHUNK_COUNT: usize = 1_000;
const FULL_SCALE_CHUNK_COUNT: usize = 50_000;

/// Handbook-style chunk text, made unique by its index.
fn generate_chunk_text(index: usize) -> String {
    let topics = [
        "remote work policy allows three days per week from home",
        "expense reports above five hundred dollars need approval",
        "the security team rotates credentials every ninety days",
        "new hires complete onboarding within their first two weeks",
        "parental leave is sixteen weeks for all full time staff",
    ];
    format!(
        "Section {}: {}. Contact the people operations desk for exceptions \
         and consult the regional addendum for local rules.",
        index,
        topics[index % topics.len()]
    )
}

fn chunk_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_CHUNK_COUNT
    } else {
        CI_CHUNK_COUNT
    }
}

fn build_populated_index(count: usize) -> (Arc<VectorIndex>, MockEmbedding) {
    let index = Arc::new(VectorIndex::new());
    let embedder = MockEmbedding::new();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    let entries: Vec<(Vec<f32>, Chunk)> = (0..count)
        .map(|i| {
            let text = generate_chunk_text(i);
            let vector = rt.block_on(embedder.embed(&text)).expect("embed failed");
            let chunk = Chunk {
                char_span: (0, text.chars().count()),
                text,
                source_document: format!("handbook_{}.md", i / 100),
                sequence_index: i % 100,
            };
            (vector, chunk)
        })
        .collect();
    index.add(entries).expect("add failed");

    assert_eq!(index.len(), count);
    (index, embedder)
}

fn bench_index_search(c: &mut Criterion) {
    let count = chunk_count();
    let (index, embedder) = build_populated_index(count);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    let query_vec = rt
        .block_on(embedder.embed("how many remote days per week"))
        .expect("query embed failed");

    let mut group = c.benchmark_group("index_search");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    for k in [1usize, 3, 10] {
        group.bench_function(format!("top{}_{}chunks", k, count), |b| {
            b.iter(|| {
                let hits = index.search(&query_vec, k).expect("search failed");
                assert_eq!(hits.len(), k);
                hits
            });
        });
    }

    group.finish();
}

fn bench_retrieve(c: &mut Criterion) {
    let count = chunk_count();
    let (index, embedder) = build_populated_index(count);
    let retriever = Retriever::new(index, embedder);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    let mut group = c.benchmark_group("retrieve");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("embed_and_search_top3_{}chunks", count), |b| {
        b.iter(|| {
            rt.block_on(retriever.retrieve("expense approval threshold", 3))
                .expect("retrieve failed")
        });
    });

    group.finish();
}

fn bench_add_single(c: &mut Criterion) {
    let (index, embedder) = build_populated_index(CI_CHUNK_COUNT);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    let query_vec = rt
        .block_on(embedder.embed("credential rotation"))
        .expect("query embed failed");

    // Interleaved read then write, the pattern of a query racing an ingest.
    c.bench_function("search_then_add_1", |b| {
        b.iter(|| {
            let _hits = index.search(&query_vec, 1).expect("search failed");
            index
                .add(vec![(
                    query_vec.clone(),
                    Chunk {
                        text: "probe".to_string(),
                        source_document: "probe.txt".to_string(),
                        sequence_index: 0,
                        char_span: (0, 5),
                    },
                )])
                .expect("add failed")
        });
    });
}

criterion_group!(benches, bench_index_search, bench_retrieve, bench_add_single);
criterion_main!(benches);
