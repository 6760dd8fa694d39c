use std::path::Path;

use stagecraft_build::{RealExecutor, run_doctor};

pub async fn doctor() -> anyhow::Result<()> {
    let report = run_doctor(&RealExecutor, Path::new(".")).await;

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed; see above for details");
    }

    Ok(())
}
