use crate::error::SimResult;
use crate::models::ke0::Ke0Method;
use crate::simulation::result::RunResult;
use log::info;
use std::fs::File;
use std::path::Path;

pub fn save_results<P: AsRef<Path>>(result: &RunResult, output_dir: P) -> SimResult<()> {
    let output_path = output_dir.as_ref();

    save_concentration_data(result, &output_path.join("concentrations.csv"))?;
    save_diagnostics(result, &output_path.join("diagnostics.json"))?;
    generate_report(result, &output_path.join("simulation_report.md"))?;

    info!("All results saved to {:?}", output_path);
    Ok(())
}

fn save_concentration_data<P: AsRef<Path>>(result: &RunResult, path: P) -> SimResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["TIME", "A1", "A2", "A3", "CP", "CE"])?;
    for snapshot in &result.snapshots {
        writer.write_record(&[
            snapshot.time_min.to_string(),
            snapshot.a1_mg.to_string(),
            snapshot.a2_mg.to_string(),
            snapshot.a3_mg.to_string(),
            snapshot.cp_ug_per_ml.to_string(),
            snapshot.ce_ug_per_ml.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_diagnostics<P: AsRef<Path>>(result: &RunResult, path: P) -> SimResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &result.diagnostics)?;
    Ok(())
}

fn generate_report<P: AsRef<Path>>(result: &RunResult, path: P) -> SimResult<()> {
    let d = &result.diagnostics;

    let (cp_peak_t, cp_peak) = result.peak_plasma().unwrap_or((0.0, 0.0));
    let (ce_peak_t, ce_peak) = result.peak_effect_site().unwrap_or((0.0, 0.0));
    let duration = result
        .final_snapshot()
        .map(|s| s.time_min)
        .unwrap_or(0.0);

    let ke0_numerical = match d.ke0_numerical {
        Some(value) => format!("{:.4} /min", value),
        None => "no root in the search bracket".to_string(),
    };
    let ke0_method = match d.ke0_method {
        Ke0Method::Numerical => "exact peak-time solver",
        Ke0Method::Regression => "regression fallback",
    };

    let report_content = format!(
        r#"# PK/PD Effect-Site Simulation Report

## Run Overview
- **Simulated time**: {:.1} min
- **Snapshots**: {}
- **Completed**: {}
- **Degraded fixed-step mode**: {}

## ke0 Resolution
- **In use**: {:.4} /min ({})
- **Exact solver**: {}
- **Regression estimate**: {:.4} /min

## Concentration Endpoints
- **Peak plasma**: {:.4} ug/mL at {:.1} min
- **Peak effect site**: {:.4} ug/mL at {:.1} min
- **Effect-site lag behind plasma peak**: {:.1} min

## Integrator
- **Accepted steps**: {}
- **Rejected steps**: {}
- **Corrector convergence failures**: {}
- **Method switches**: {}
- **Final method / order**: {:?} / {}

## Files Generated
- `concentrations.csv`: per-tick compartment masses and concentrations
- `diagnostics.json`: run diagnostics and ke0 resolution detail
"#,
        duration,
        result.snapshots.len(),
        result.completed,
        d.degraded,
        d.ke0_value,
        ke0_method,
        ke0_numerical,
        d.ke0_regression,
        cp_peak,
        cp_peak_t,
        ce_peak,
        ce_peak_t,
        ce_peak_t - cp_peak_t,
        d.accepted_steps,
        d.rejected_steps,
        d.convergence_failures,
        d.method_switches,
        d.final_method,
        d.final_order,
    );

    std::fs::write(path, report_content)?;
    Ok(())
}
