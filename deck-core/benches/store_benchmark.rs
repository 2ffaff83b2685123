use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use deck_core::{sanitize, DocumentStore, Slide, TextBlock};
use serde_json::json;
use std::hint::black_box;

fn deck_with_blocks(slides: usize, blocks_per_slide: usize) -> DocumentStore {
    let slides = (0..slides)
        .map(|i| {
            let mut slide = Slide::new(format!("s{i}"), i);
            slide.content = (0..blocks_per_slide)
                .map(|j| TextBlock::new(format!("t{i}-{j}")).at(j as u32 * 10, 20))
                .collect();
            slide
        })
        .collect();
    DocumentStore::with_slides(slides)
}

fn bench_sanitize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sanitizer");
    group.throughput(Throughput::Elements(1));

    let clean = json!({
        "id": "t1", "x": 100, "y": 100, "width": 200, "height": 60,
        "content": "Quarterly numbers", "fontSize": 16, "fontWeight": "bold",
        "fontStyle": "normal", "textAlign": "center", "type": "text",
        "createdBy": "u1", "timestamp": 1700000000000u64
    });
    let messy = json!({
        "id": 42, "x": "-15", "y": "abc", "width": 3, "height": null,
        "content": 7, "fontSize": "0", "fontWeight": "heavy"
    });

    group.bench_function("sanitize_clean", |b| b.iter(|| black_box(sanitize(black_box(&clean)))));
    group.bench_function("sanitize_messy", |b| b.iter(|| black_box(sanitize(black_box(&messy)))));
    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("DocumentStore");

    group.bench_function("upsert_existing_20x50", |b| {
        let mut store = deck_with_blocks(20, 50);
        let block = TextBlock::new("t19-49").at(5, 5);
        b.iter(|| black_box(store.update_text_block_in_slide(19, "t19-49", black_box(block.clone()))))
    });

    group.bench_function("find_block_20x50", |b| {
        let store = deck_with_blocks(20, 50);
        b.iter(|| black_box(store.find_text_block(black_box("t19-49"))))
    });

    group.bench_function("add_remove_block", |b| {
        let mut store = deck_with_blocks(1, 50);
        let block = TextBlock::new("fresh");
        b.iter(|| {
            store.add_text_block_to_slide(0, block.clone());
            black_box(store.remove_text_block_from_slide(0, "fresh"));
        })
    });

    group.finish();
}

criterion_group!(benches, bench_sanitize, bench_store);
criterion_main!(benches);
