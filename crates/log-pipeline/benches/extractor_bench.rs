//! 이벤트 추출기 벤치마크
//!
//! 매칭되는 라인, 매칭되지 않는 라인, 실제와 비슷한 혼합 배치의 처리량을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tailpost_log_pipeline::extractor::{Extractor, RuleLoader};

const JOIN_REQUEST: &str =
    r#"[2024.03.01-10.00.01:000][  1]LogNet: Join request: Name="Bo Jackson" EOSID=00a42f"#;
const KILL: &str = r#"[2024.03.01-11.00.00:000][ 40]LogCombat: Kill: Killer="Ann" Victim="Bo" Weapon="Compound Bow" Distance=41.5"#;
const AIRDROP: &str =
    "[2024.03.01-12.00.00:000][ 99]LogWorld: Airdrop spawned at X=-1200.5 Y=300 Z=12";
const NOISE: &str = "[2024.03.01-12.00.00:000][ 99]LogStreaming: Display: Flushing async loaders for level streaming";
const GARBAGE: &str = "}}} partial line without any prefix at all";

const CUSTOM_RULES: &str = r#"
rules:
  - category: bounty
    pattern: 'LogBounty: Claimed by EOSID=(?P<player>\w+) Reward=(?P<reward>\d+)'
    fields:
      - name: player
      - name: reward
        kind: number
  - category: base_raid
    pattern: 'LogBase: Raid on (?P<base>\w+) by (?P<attacker>\w+)'
    fields:
      - name: base
      - name: attacker
"#;

fn mixed_batch(size: usize) -> Vec<String> {
    // mostly noise, like a real server log
    let pattern = [NOISE, NOISE, NOISE, JOIN_REQUEST, NOISE, KILL, NOISE, AIRDROP, GARBAGE, NOISE];
    pattern
        .iter()
        .cycle()
        .take(size)
        .map(|line| (*line).to_owned())
        .collect()
}

fn bench_single_line(c: &mut Criterion) {
    let extractor = Extractor::builtin().unwrap();
    let mut group = c.benchmark_group("extract_line");
    group.throughput(Throughput::Elements(1));

    for (name, line) in [
        ("join_request", JOIN_REQUEST),
        ("kill", KILL),
        ("airdrop", AIRDROP),
        ("unmatched", NOISE),
        ("no_prefix", GARBAGE),
    ] {
        group.bench_function(name, |b| b.iter(|| extractor.extract(black_box(line))));
    }
    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let builtin = Extractor::builtin().unwrap();
    let custom =
        Extractor::with_custom(RuleLoader::parse_yaml(CUSTOM_RULES, "bench").unwrap()).unwrap();

    let mut group = c.benchmark_group("extract_batch");
    for size in [100usize, 1000, 10_000] {
        let lines = mixed_batch(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("builtin", size), &lines, |b, lines| {
            b.iter(|| builtin.extract_all(black_box(lines)))
        });
        group.bench_with_input(BenchmarkId::new("with_custom", size), &lines, |b, lines| {
            b.iter(|| custom.extract_all(black_box(lines)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_line, bench_batches);
criterion_main!(benches);
