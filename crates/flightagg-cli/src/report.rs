use flightagg_core::{CombineReport, DatasetOutcome, JsonBenchmark};
use std::io::{self, Write};

/// Per-dataset fetch lines, per-dataset means, then the combined statistics.
pub fn write_combine_report<W: Write>(out: &mut W, report: &CombineReport) -> io::Result<()> {
    for outcome in &report.datasets {
        match outcome {
            DatasetOutcome::Fetched(fetched) => writeln!(
                out,
                "Fetched {} in {:.2} seconds (rows: {})",
                fetched.dataset,
                fetched.elapsed.as_secs_f64(),
                fetched.aggregate.valid_rows
            )?,
            DatasetOutcome::Failed { dataset, error } => {
                writeln!(out, "FAILED {}: {}", dataset, error)?
            }
        }
    }

    writeln!(out)?;
    for fetched in report.fetched() {
        let agg = &fetched.aggregate;
        write!(out, "{} rows: {}, mean: {:.2}", fetched.dataset, agg.valid_rows, agg.mean)?;
        if agg.null_rows() > 0 {
            write!(out, " ({} null values skipped)", agg.null_rows())?;
        }
        writeln!(out)?;
    }

    if let Some(combined) = &report.combined {
        writeln!(out)?;
        writeln!(out, "Total merged rows: {}", combined.total_rows)?;
        writeln!(out, "Weighted mean of all values: {:.2}", combined.weighted_mean)?;
        writeln!(
            out,
            "Mean of per-dataset means ({} datasets): {:.2}",
            combined.datasets, combined.mean_of_means
        )?;
    }
    Ok(())
}

pub fn write_json_benchmark<W: Write>(out: &mut W, bench: &JsonBenchmark) -> io::Result<()> {
    writeln!(out, "--- JSON vs Arrow: {} ---", bench.dataset)?;
    writeln!(
        out,
        "Arrow Flight: {:.4} s ({} rows)",
        bench.arrow_elapsed.as_secs_f64(),
        bench.arrow_rows
    )?;
    writeln!(
        out,
        "JSON transfer + parsing: {:.4} s ({} rows)",
        bench.json_elapsed.as_secs_f64(),
        bench.json_rows
    )?;
    writeln!(out, "Arrow is {:.1}x faster than JSON", bench.speedup())
}
