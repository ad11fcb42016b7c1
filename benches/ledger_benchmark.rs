use asic_market::ledger::ReservationLedger;
use asic_market::recommendation::parse_reply;
use asic_market::resource::ResourceRecord;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use std::sync::Arc;
use std::thread;

// Contended reserve/release traffic spread over a varying number of resources
pub fn ledger_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_ledger");

    for resource_count in [1usize, 16, 256].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(resource_count),
            resource_count,
            |b, &resource_count| {
                b.iter(|| {
                    let ledger = Arc::new(ReservationLedger::new());
                    let ids = (0..resource_count)
                        .map(|i| format!("asic-{:03}", i))
                        .collect::<Vec<_>>();
                    for id in &ids {
                        ledger
                            .register(&ResourceRecord::new(id.clone(), "Antminer S19", 64))
                            .unwrap();
                    }

                    let mut handles = vec![];
                    for _ in 0..4 {
                        let ledger = Arc::clone(&ledger);
                        let ids = ids.clone();

                        handles.push(thread::spawn(move || {
                            let mut rng = thread_rng();
                            let mut held: Vec<(String, u32)> = Vec::new();

                            for _ in 0..250 {
                                // 60% reserve, 40% release of something we hold
                                if held.is_empty() || rng.gen_bool(0.6) {
                                    let id = ids.choose(&mut rng).unwrap();
                                    let units = rng.gen_range(1..=4);
                                    if ledger.reserve(id, units).is_ok() {
                                        held.push((id.clone(), units));
                                    }
                                } else {
                                    let idx = rng.gen_range(0..held.len());
                                    let (id, units) = held.swap_remove(idx);
                                    ledger.release(&id, units).unwrap();
                                }
                            }
                        }));
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }

                    black_box(ledger.stats())
                });
            },
        );
    }

    group.finish();
}

pub fn extractor_benchmark(c: &mut Criterion) {
    let reply = format!(
        "Based on your budget, here is what I found:\n```json\n{}\n```",
        r#"{"top_3_asic_models": ["Antminer S19 Pro", "Whatsminer M30S", "Avalon 1246"],
            "key_metrics": {
              "Antminer S19 Pro": {"cost_per_th": "$0.05", "joules_per_th": 29.5, "tags": ["efficient"]},
              "Whatsminer M30S": {"cost_per_th": 0.06, "joules_per_th": 38, "pool_advice": "Use {low-fee} pools"},
              "Avalon 1246": {"cost_per_th": 0.07, "joules_per_th": 38}
            },
            "summary_of_trade_offs": {"Antminer S19 Pro": "Louder", "Avalon 1246": "Older firmware"},
            "recommended_rental_duration": "30 days",
            "budget_envelope": {"min": 120, "max": 150}}"#
    );

    c.bench_function("parse_reply", |b| b.iter(|| black_box(parse_reply(black_box(&reply)))));
}

criterion_group!(benches, ledger_benchmark, extractor_benchmark);
criterion_main!(benches);
