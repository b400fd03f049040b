use criterion::{Criterion, black_box, criterion_group, criterion_main};

use coursemart_pricing::{Amount, RateTable, derive_prices};

fn bench_derive_prices(c: &mut Criterion) {
    let rates = RateTable::default();

    c.bench_function("derive_prices/all_markets", |b| {
        b.iter(|| derive_prices(black_box(Amount::from_cents(4999)), false, black_box(&rates)))
    });

    c.bench_function("derive_prices/free", |b| {
        b.iter(|| derive_prices(black_box(Amount::from_cents(4999)), true, black_box(&rates)))
    });
}

criterion_group!(benches, bench_derive_prices);
criterion_main!(benches);
