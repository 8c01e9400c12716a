use clap::Parser;
use clap::ValueEnum;
use home_hash::HashTable;
use home_hash::hashing::CastHasher;
use home_hash::hashing::FixedFoldHasher;
use home_hash::hashing::KeyHasher;
use home_hash::memory::Tracked;
use home_hash::node::Node;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Keys {
    /// 0, 1, 2, ...
    Sequential,
    /// Multiples of `stride`.
    Strided,
    /// Uniformly random u64s.
    Random,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Hashing {
    /// Identity hashing.
    Cast,
    /// foldhash with a fixed seed.
    Fold,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'n', long = "count", default_value_t = 1000)]
    count: usize,

    #[arg(short = 'k', long = "keys", value_enum, default_value_t = Keys::Sequential)]
    keys: Keys,

    #[arg(short = 's', long = "stride", default_value_t = 16)]
    stride: u64,

    #[arg(long = "hashing", value_enum, default_value_t = Hashing::Fold)]
    hashing: Hashing,

    /// Remove every other key after filling.
    #[arg(long = "churn")]
    churn: bool,

    /// Shrink the table after filling (and churning).
    #[arg(long = "minimize")]
    minimize: bool,
}

fn keys(args: &Args) -> Vec<u64> {
    match args.keys {
        Keys::Sequential => (0..args.count as u64).collect(),
        Keys::Strided => (0..args.count as u64).map(|k| k * args.stride).collect(),
        Keys::Random => {
            let mut rng = SmallRng::seed_from_u64(0x5747_5354);
            (0..args.count).map(|_| rng.random()).collect()
        }
    }
}

fn run<H: KeyHasher<u64>>(args: &Args, hasher: H) {
    let mut mem = Tracked::new();
    let mut table: HashTable<u64, u64, H> = HashTable::with_hasher(hasher);

    let keys = keys(args);
    for &k in &keys {
        table.insert_node(&mut mem, k, k).set_val_modified();
    }
    println!(
        "Inserted {} keys, capacity {}, peak {} bytes",
        table.len(),
        table.capacity(),
        mem.peak_bytes()
    );

    if args.churn {
        for k in keys.iter().step_by(2) {
            table.remove(k);
        }
        println!("Removed every other key, {} remain", table.len());
    }

    if args.minimize {
        table.minimize(&mut mem);
        println!("Minimized to capacity {}", table.capacity());
    }

    table.chain_stats().print();
    println!(
        "Allocations: {}, releases: {}, live bytes: {}",
        mem.allocations(),
        mem.releases(),
        mem.live_bytes()
    );

    table.clear(&mut mem);
}

fn main() {
    let args = Args::parse();

    match args.hashing {
        Hashing::Cast => run(&args, CastHasher),
        Hashing::Fold => run(&args, FixedFoldHasher::with_seed(0)),
    }
}
