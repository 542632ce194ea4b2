use criterion::{criterion_group, criterion_main, Criterion};

use lobelia::clock::Timer;
use lobelia::exchange::iona_v1::IonaV1;
use lobelia::input::calliope::{Bar, Calliope};

fn bar(open: f64) -> Bar {
    Bar {
        open,
        high: open * 1.01,
        low: open * 0.99,
        close: open,
        volume: 10_000.0,
    }
}

fn iona_core_loop_test() {
    let mut source = Calliope::new();
    for tick in 0..4 {
        let date = 100 + tick * 10;
        source.add_bar(date, "ABC/USDT", bar(100.0));
        source.add_bar(date, "BCD/USDT", bar(10.0));
    }

    let mut timer = Timer::new(100, 130, 10);
    let mut exchange = IonaV1::new(source, timer.clone());
    exchange.deposit("USDT", 1_000_000.0).unwrap();

    exchange.create_market_buy_order("ABC/USDT", 100.0).unwrap();
    exchange.create_market_buy_order("ABC/USDT", 100.0).unwrap();
    exchange.create_limit_buy_order("BCD/USDT", 100.0, 9.0).unwrap();

    timer.advance();
    exchange.process().unwrap();
    timer.advance();
    exchange.process().unwrap();
    timer.advance();
    exchange.process().unwrap();
}

fn benchmarks(c: &mut Criterion) {
    c.bench_function("iona core loop", |b| b.iter(iona_core_loop_test));
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
