use std::path::PathBuf;
use std::time::Instant;

use structopt::StructOpt;

use dist_spmv::comm::{run_group, RankComm};
use dist_spmv::distribute::{broadcast_shape, distribute_matrix, ones_vector, Shape};
use dist_spmv::ghost::{build_ghost_plan, classify_columns, exchange_ghost_values};
use dist_spmv::metrics::{self, BenchReport, IterationTiming, RankCounters};
use dist_spmv::spmv::local_spmv;
use dist_spmv::{gen, io, CsrMatrix, Error, Result};

#[macro_use]
extern crate log;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "dist_spmv",
    about = "Benchmark a distributed CSR sparse matrix-vector product over a rank group"
)]
struct Opt {
    /// Matrix file in matrix market format
    #[structopt(parse(from_os_str), required_unless = "synthetic")]
    matrix: Option<PathBuf>,

    /// Generate a synthetic matrix instead: rows per rank (the matrix is
    /// base_m * nprocs square, for weak scaling)
    #[structopt(long)]
    synthetic: Option<usize>,

    /// Nonzero density of the synthetic matrix
    #[structopt(long, default_value = "0.001")]
    density: f64,

    /// Seed for the synthetic matrix
    #[structopt(long, default_value = "42")]
    seed: u64,

    /// Number of ranks in the group
    #[structopt(short = "p", long, default_value = "4")]
    nprocs: usize,

    /// Worker threads per rank for the row kernel (0 = all cores)
    #[structopt(short, long, default_value = "0")]
    threads: usize,

    /// Untimed warm-up iterations
    #[structopt(long, default_value = "3")]
    warmup: usize,

    /// Timed benchmark iterations
    #[structopt(long, default_value = "10")]
    iters: usize,

    /// Also dump the report as JSON to this path
    #[structopt(long, parse(from_os_str))]
    json: Option<PathBuf>,
}

fn bench_rank(
    comm: &RankComm,
    global: Option<&CsrMatrix>,
    threads: usize,
    warmup: usize,
    iters: usize,
    matrix_name: &str,
) -> Result<Option<BenchReport>> {
    let shape = broadcast_shape(
        comm,
        global.map(|mat| Shape {
            rows: mat.rows(),
            cols: mat.cols(),
            nnz: mat.nnz(),
        }),
    )?;

    let shard = distribute_matrix(comm, global)?;
    let plan = build_ghost_plan(comm, shape.cols, &shard.col_idx)?;
    let class = classify_columns(comm.rank(), comm.nprocs(), &shard.col_idx, &plan)?;
    let local_x = ones_vector(shape.cols, comm.rank(), comm.nprocs());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Config(format!("cannot build worker pool: {e}")))?;

    for _ in 0..warmup {
        let ghost_values = exchange_ghost_values(comm, &plan, &local_x)?;
        pool.install(|| local_spmv(&shard, &local_x, &ghost_values, &class));
    }

    // The ghost buffer is refreshed in full before any read of it, and the
    // next exchange starts only after the kernel is done; there is no
    // cross-iteration pipelining.
    let mut timings = Vec::with_capacity(iters);
    for _ in 0..iters {
        let comm_start = Instant::now();
        let ghost_values = exchange_ghost_values(comm, &plan, &local_x)?;
        let comm_elapsed = comm_start.elapsed();

        let compute_start = Instant::now();
        let _y = pool.install(|| local_spmv(&shard, &local_x, &ghost_values, &class));
        timings.push(IterationTiming {
            comm: comm_elapsed,
            compute: compute_start.elapsed(),
        });
    }

    // Resident footprint: shard arrays, vector slice, ghost columns plus
    // the per-iteration value buffer, and the classification arrays.
    let local_bytes = (shard.row_ptr.len() + shard.col_idx.len() + class.access_idx.len())
        * std::mem::size_of::<usize>()
        + (shard.values.len() + local_x.len() + 2 * plan.ghost_count())
            * std::mem::size_of::<f64>()
        + class.is_local.len() * std::mem::size_of::<bool>();

    let counters = RankCounters {
        local_rows: shard.rows(),
        local_nnz: shard.nnz(),
        ghost_count: plan.ghost_count(),
        local_bytes,
    };
    metrics::collect(comm, matrix_name, shape, counters, &timings)
}

fn run(opt: &Opt) -> Result<BenchReport> {
    if opt.iters == 0 {
        return Err(Error::Config("need at least one timed iteration".into()));
    }

    let (mat, name) = match opt.synthetic {
        Some(base_m) => {
            let m = base_m * opt.nprocs;
            (gen::generate_matrix(m, opt.density, opt.seed)?, "synthetic".to_string())
        }
        None => {
            // structopt guarantees the path is present here.
            let path = opt.matrix.as_ref().unwrap();
            (io::load_matrix_market(path)?, path.display().to_string())
        }
    };
    let threads = if opt.threads == 0 {
        num_cpus::get()
    } else {
        opt.threads
    };
    info!(
        "{} ranks, {} worker threads each, {} warm-up + {} timed iterations",
        opt.nprocs, threads, opt.warmup, opt.iters
    );

    let results = run_group(opt.nprocs, |comm| {
        let global = (comm.rank() == 0).then_some(&mat);
        bench_rank(&comm, global, threads, opt.warmup, opt.iters, &name)
    })?;

    let mut report = None;
    for outcome in results {
        if let Some(r) = outcome? {
            report = Some(r);
        }
    }
    report.ok_or_else(|| Error::Config("rank 0 produced no report".into()))
}

fn main() {
    pretty_env_logger::init();
    let opt = Opt::from_args();

    match run(&opt) {
        Ok(report) => {
            println!("{report}");
            if let Some(path) = &opt.json {
                let json = serde_json::to_string_pretty(&report)
                    .expect("report serialization cannot fail");
                if let Err(e) = std::fs::write(path, json) {
                    error!("cannot write {}: {e}", path.display());
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            // The only place the whole group actually aborts.
            error!("{e}");
            std::process::exit(1);
        }
    }
}
