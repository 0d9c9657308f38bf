//! Throughput Benchmark for newsd
//!
//! This benchmark measures the line-handling core: the buffer pool, line
//! framing, outbound encoding and header parsing.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use newsd::buffer::{encode, BufferPool, Charset, LineFramer};
use newsd::protocol::Reply;
use newsd::storage::Headers;
use std::sync::Arc;
use std::time::Duration;

/// Benchmark acquire/recycle on the shared pool
fn bench_pool(c: &mut Criterion) {
    let pool = Arc::new(BufferPool::new(512, 1024));

    let mut group = c.benchmark_group("pool");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_recycle", |b| {
        b.iter(|| {
            let buf = pool.acquire();
            pool.recycle(black_box(buf));
        });
    });

    group.bench_function("acquire_recycle_batch", |b| {
        b.iter(|| {
            let bufs: Vec<_> = (0..64).map(|_| pool.acquire()).collect();
            pool.recycle_all(bufs);
        });
    });

    group.finish();
}

/// Benchmark the pool under contention from several threads
fn bench_pool_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("pool_concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads", |b| {
        b.iter(|| {
            let pool = Arc::new(BufferPool::new(512, 1024));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..10_000 {
                            let buf = pool.acquire();
                            pool.recycle(buf);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(pool.stats());
        });
    });

    group.finish();
}

/// Benchmark framing raw input into lines
fn bench_framer(c: &mut Criterion) {
    let pool = Arc::new(BufferPool::new(512, 4096));

    let commands = "GROUP misc.test\r\nARTICLE 1\r\nNEXT\r\n".repeat(64);
    let article = format!(
        "From: poster@example.org\r\nNewsgroups: misc.test\r\nSubject: bench\r\n\r\n{}.\r\n",
        "The quick brown fox jumps over the lazy dog.\r\n".repeat(200)
    );
    let over_long = "X".repeat(8 * 1024);

    let mut group = c.benchmark_group("framer");

    for (name, input) in [
        ("commands", commands.as_bytes()),
        ("article_body", article.as_bytes()),
        ("over_long_line", over_long.as_bytes()),
    ] {
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_function(name, |b| {
            let mut framer = LineFramer::new(Arc::clone(&pool));
            b.iter(|| {
                let lines = framer.feed(black_box(input));
                pool.recycle_all(lines);
            });
            framer.release();
        });
    }

    // Input arriving in small segments
    group.throughput(Throughput::Bytes(article.len() as u64));
    group.bench_function("article_in_segments", |b| {
        let mut framer = LineFramer::new(Arc::clone(&pool));
        b.iter(|| {
            for chunk in article.as_bytes().chunks(37) {
                let lines = framer.feed(chunk);
                pool.recycle_all(lines);
            }
        });
        framer.release();
    });

    group.finish();
}

/// Benchmark encoding replies into pooled buffers
fn bench_encode(c: &mut Criterion) {
    let pool = BufferPool::new(512, 4096);

    let mut reply = Reply::new();
    reply.status(220, "1 <bench@example.org> article retrieved - head and body follow");
    for _ in 0..200 {
        reply.data_line("Grüße aus der Überschrift, with a .dot now and then");
    }
    reply.end_data();
    let text = reply.take();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(text.len() as u64));

    for charset in [Charset::Utf8, Charset::Latin1, Charset::UsAscii] {
        group.bench_function(charset.name(), |b| {
            b.iter(|| {
                let buffers = encode(&pool, black_box(&text), charset);
                pool.recycle_all(buffers);
            });
        });
    }

    group.finish();
}

/// Benchmark header block parsing
fn bench_headers(c: &mut Criterion) {
    let block = "Path: news.example.org!not-for-mail\r\n\
                 From: poster@example.org\r\n\
                 Newsgroups: misc.test,alt.test\r\n\
                 Subject: a subject that is folded\r\n \
                 onto a second line\r\n\
                 Message-ID: <bench@example.org>\r\n\
                 Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n\
                 Content-Type: text/plain; charset=utf-8\r\n";

    let mut group = c.benchmark_group("headers");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse", |b| {
        b.iter(|| {
            black_box(Headers::parse(black_box(block)).ok());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pool,
    bench_pool_concurrent,
    bench_framer,
    bench_encode,
    bench_headers,
);

criterion_main!(benches);
