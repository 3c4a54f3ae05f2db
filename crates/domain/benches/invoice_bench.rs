use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use domain::{DomainEvent, IdempotencyKey, Invoice, Money};

fn invoice_with_items(count: usize) -> Invoice {
    let mut invoice = Invoice::open("NF-BENCH", Some("Bench Customer".to_string())).unwrap();
    for n in 0..count {
        invoice
            .add_line_item(format!("P{n}"), 1, Money::from_cents(1000))
            .unwrap();
    }
    invoice
}

fn bench_open_add_close(c: &mut Criterion) {
    c.bench_function("invoice/open_add_close", |b| {
        b.iter(|| {
            let mut invoice = Invoice::open(black_box("NF-001"), None).unwrap();
            invoice
                .add_line_item("P1", 2, Money::from_cents(1000))
                .unwrap();
            invoice.close().unwrap()
        });
    });
}

fn bench_event_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoice/print_requested_payload");

    for count in [1, 10, 100] {
        let invoice = invoice_with_items(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &invoice, |b, invoice| {
            b.iter(|| invoice.print_requested_event().to_payload().unwrap());
        });
    }

    group.finish();
}

fn bench_idempotency_key(c: &mut Criterion) {
    c.bench_function("print/idempotency_key_parse", |b| {
        b.iter(|| IdempotencyKey::parse(black_box("client-7f3a_retry-0001")).unwrap());
    });
}

criterion_group!(
    benches,
    bench_open_add_close,
    bench_event_payload,
    bench_idempotency_key
);
criterion_main!(benches);
