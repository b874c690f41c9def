use laser_homing::sim::SimLaser;
use laser_homing::{home, HomingConfig, NoDelay, StageOutcome};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // -----------------------------------------------------------------------
    // Plant: simulated external-cavity tunable laser
    // -----------------------------------------------------------------------
    // Motor scan parked 3.8 nm below target, piezo off-center at 95 V,
    // 10 fm of wavemeter read noise.
    let laser = SimLaser::new(1546.2, 95.0).with_noise(0.00001, 7);
    let mut wavemeter = laser.wavemeter();
    let mut motor = laser.motor();
    let mut piezo = laser.piezo();

    let target = 1550.0;
    let cfg = HomingConfig::new(target);

    // -----------------------------------------------------------------------
    // Home
    // -----------------------------------------------------------------------
    // The plant settles instantly, so no real settling waits are needed.
    let report = home(&mut wavemeter, &mut motor, &mut piezo, &cfg, &NoDelay);

    // -----------------------------------------------------------------------
    // Print results
    // -----------------------------------------------------------------------
    let (coarse_iters, fine_iters) = report.iterations();
    let residual = report.final_value() - target;

    println!();
    println!("====================================================================");
    println!("  LASER WAVELENGTH HOMING — simulated bench");
    println!("====================================================================");
    println!();
    println!("  Target");
    println!("  ──────────────────────────────────────────────────────────────────");
    println!(
        "  Wavelength:    {:>12.6} nm   Coarse tol:  {:>10.6} nm",
        target, cfg.coarse.precision
    );
    println!(
        "  Fine tol:      {:>12.6} nm",
        cfg.fine.precision
    );
    println!();
    println!("  Stages");
    println!("  ──────────────────────────────────────────────────────────────────");
    match &report.coarse {
        Some(stage) => println!(
            "  COARSE    {:>3} iterations   {}",
            stage.iterations,
            outcome_label(stage.outcome)
        ),
        None => println!("  COARSE    skipped (already inside coarse tolerance)"),
    }
    println!(
        "  FINE      {:>3} iterations   {}",
        fine_iters,
        outcome_label(report.fine.outcome)
    );
    println!();
    println!("  Result");
    println!("  ──────────────────────────────────────────────────────────────────");
    println!("  Final reading: {:>12.6} nm", report.final_value());
    println!(
        "  Residual:      {:>12.3} pm",
        residual * 1000.0
    );
    println!(
        "  Motor:         {:>12.4} nm   Piezo:       {:>10.3} V",
        laser.motor_setting(),
        laser.piezo_setting()
    );
    println!(
        "  Iterations:    {:>4} coarse / {} fine",
        coarse_iters, fine_iters
    );
    println!();
}

fn outcome_label(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Converged => "converged",
        StageOutcome::IterationLimitExceeded => "iteration limit exceeded",
    }
}
