use console::Style;
use std::path::Path;

use crate::mutants::Mutation;
use crate::operators::{self, Operator, REGISTRY};
use crate::state::{RunReport, RunStatus, SkippedUnit, SurvivedMutant};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

fn print_skipped(skipped: &[SkippedUnit]) {
    let dim = Style::new().dim();
    for unit in skipped {
        println!("  {} skipped {}: {}", dim.apply_to("·"), unit.file, unit.reason);
    }
}

pub fn print_run_report(report: &RunReport) {
    if report.status == RunStatus::BaselineFailed {
        print_baseline_failure(report);
        return;
    }

    let score_pct = report.score * 100.0;
    let testable = report.total - report.errored;

    if report.survived == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {} mutants, all detected ({:.1}%) in {:.1}s",
            style.apply_to("✓"),
            testable,
            score_pct,
            report.duration_ms as f64 / 1000.0,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {} survived / {} testable ({:.1}% detected) in {:.1}s",
            style.apply_to("!"),
            report.survived,
            testable,
            score_pct,
            report.duration_ms as f64 / 1000.0,
        );
    }

    let dim = Style::new().dim();
    if report.errored > 0 {
        println!("  {} {} mutants errored", dim.apply_to("·"), report.errored);
    }
    if report.timed_out > 0 {
        println!("  {} {} mutants timed out", dim.apply_to("·"), report.timed_out);
    }
    print_skipped(&report.skipped);

    let survivors = report.survivors();
    if survivors.is_empty() {
        return;
    }
    println!();
    for m in &survivors {
        let ref_style = Style::new().cyan().bold();
        let loc_style = Style::new().dim();
        let op_style = Style::new().magenta();

        println!(
            "  {} {}:{} {} {} → {}",
            ref_style.apply_to(format!("@{}", m.ref_id)),
            m.file,
            m.line,
            loc_style.apply_to(format!("[{}]", m.operator)),
            op_style.apply_to(first_line(&m.original)),
            op_style.apply_to(display_replacement(&m.replacement)),
        );
    }
}

pub fn print_baseline_failure(report: &RunReport) {
    print_error("Tests fail before mutation. Fix failing tests first.");
    if let Some(output) = &report.baseline_output {
        let dim = Style::new().dim();
        for line in output.lines() {
            eprintln!("  {}", dim.apply_to(line));
        }
    }
}

fn first_line(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    if lines.next().is_some() {
        format!("{} …", first)
    } else {
        first.to_string()
    }
}

fn display_replacement(replacement: &str) -> String {
    if replacement.is_empty() {
        "(removed)".to_string()
    } else {
        first_line(replacement)
    }
}

pub fn print_mutant_detail(m: &SurvivedMutant) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}:{}:{} [{}]",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        m.file,
        m.line,
        m.column,
        m.operator,
    );
    println!();

    for line in &m.context_before {
        println!("  {}", dim.apply_to(line));
    }

    for line in m.diff.lines() {
        if line.starts_with('-') {
            let del_style = Style::new().red();
            println!("  {}", del_style.apply_to(line));
        } else if line.starts_with('+') {
            let add_style = Style::new().green();
            println!("  {}", add_style.apply_to(line));
        }
    }

    for line in &m.context_after {
        println!("  {}", dim.apply_to(line));
    }
}

pub fn print_status(report: &RunReport) {
    if report.status == RunStatus::BaselineFailed {
        println!("Last run: baseline failed, no mutants tested");
        return;
    }
    let score_pct = report.score * 100.0;

    println!(
        "Last run: {} mutants, {} killed, {} timed out, {} survived, {} errored ({:.1}% score)",
        report.total, report.killed, report.timed_out, report.survived, report.errored, score_pct,
    );

    let survivors = report.survivors();
    if !survivors.is_empty() {
        println!();
        for m in &survivors {
            let ref_style = Style::new().cyan().bold();
            println!(
                "  {} {}:{} {} → {}",
                ref_style.apply_to(format!("@{}", m.ref_id)),
                m.file,
                m.line,
                first_line(&m.original),
                display_replacement(&m.replacement),
            );
        }
        println!();
        println!("Use `jsmutator show @m1` for details on a specific mutant.");
    }
}

pub fn print_mutations(file: &Path, mutations: &[Mutation]) {
    let id_style = Style::new().cyan();
    let dim = Style::new().dim();
    let op_style = Style::new().magenta();

    println!("{}: {} mutations", file.display(), mutations.len());
    for m in mutations {
        let parent = if m.parent_id.is_root() {
            String::new()
        } else {
            format!(" (in {})", m.parent_id)
        };
        println!(
            "  {} {}:{} {} {} → {}{}",
            id_style.apply_to(m.id),
            m.line,
            m.column,
            dim.apply_to(format!("[{}]", m.operator)),
            op_style.apply_to(first_line(&m.original)),
            op_style.apply_to(display_replacement(&m.replacement)),
            dim.apply_to(parent),
        );
    }
}

pub fn print_operators() {
    let defaults = operators::default_excludes();
    let code_style = Style::new().bold();
    let dim = Style::new().dim();
    for op in REGISTRY.iter().chain(std::iter::once(&Operator::Base)) {
        let note = if defaults.contains(op.code()) { " (excluded by default)" } else { "" };
        println!(
            "{:<20} {}{}",
            code_style.apply_to(op.code()),
            op.description(),
            dim.apply_to(note),
        );
    }
}
