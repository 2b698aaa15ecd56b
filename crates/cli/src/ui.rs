use colored::Colorize;
use taskrunner::RunReport;

/// Print the banner shown before a build starts
pub fn print_build_banner(component: &str, scenario: &str, namespace: &str) {
    println!();
    println!(
        "{} {} {}",
        "kdo".cyan().bold(),
        component.bold(),
        format!("[{scenario}]").bright_black()
    );
    println!("  {} {}", "namespace:".bright_black(), namespace);
    println!("{}", "─".repeat(50).bright_black());
}

/// Print the closing line once every task of the run went through
pub fn print_build_ready(component: &str, report: &RunReport) {
    let created = report.tasks.iter().filter(|t| t.created).count();
    println!();
    println!(
        "{} {} is ready ({} tasks, {} units created)",
        "✓".green().bold(),
        component.green().bold(),
        report.tasks.len(),
        created
    );
}

/// Print an error and its causes
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "✗".red().bold(), err.to_string().red());
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".bright_black(), cause);
    }
}

/// Print what a finished build did, one line per task
pub fn print_report(report: &RunReport) {
    println!();
    println!("{} {}", "Summary".bold(), report.scenario.bright_black());

    for (volume, claim) in &report.volumes {
        println!("  {} {} → {}", "Volume:".bright_black(), volume, claim.green());
    }

    for outcome in &report.tasks {
        let mut steps = Vec::new();
        steps.push(if outcome.created { "created" } else { "reused" });
        if outcome.synced {
            steps.push("synced");
        }
        if outcome.executed {
            steps.push("executed");
        }
        println!(
            "  {} {} [{}] {} {}",
            "▶".cyan(),
            outcome.task.bold(),
            outcome.kind,
            outcome.pod.green(),
            steps.join(", ").bright_black()
        );
    }
}
