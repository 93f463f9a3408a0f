use nexapro::output::{infer_command_name, HumanOutput};

#[test]
fn human_output_includes_sections() {
    let mut human = HumanOutput::new("Project created");
    human.push_summary("ID", "12");
    human.push_detail("#12 Apollo [Planning] 0%");
    human.push_warning("gateway unreachable: project kept locally and not saved");
    human.push_next_step("nexapro project list");

    let rendered = human.to_string();
    assert!(rendered.contains("Project created"));
    assert!(rendered.contains("Summary:"));
    assert!(rendered.contains("- ID: 12"));
    assert!(rendered.contains("Details:"));
    assert!(rendered.contains("- #12 Apollo [Planning] 0%"));
    assert!(rendered.contains("Warnings:"));
    assert!(rendered.contains("- gateway unreachable"));
    assert!(rendered.contains("Next steps:"));
    assert!(rendered.contains("- nexapro project list"));
}

#[test]
fn human_output_omits_empty_sections() {
    let human = HumanOutput::new("0 project(s)");
    let rendered = human.to_string();
    assert_eq!(rendered, "0 project(s)");
}

#[test]
fn command_name_skips_flag_values() {
    let args = |raw: &[&str]| raw.iter().map(|arg| arg.to_string()).collect::<Vec<_>>();

    assert_eq!(
        infer_command_name(args(&["--gateway", "http://x", "task", "edit", "3"])),
        "task edit"
    );
    assert_eq!(infer_command_name(args(&["--json", "stats"])), "stats");
    assert_eq!(infer_command_name(args(&["project"])), "project");
    assert_eq!(infer_command_name(args(&[])), "nexapro");
}

#[test]
fn summary_key_without_value_renders_bare() {
    let mut human = HumanOutput::new("Task deleted");
    human.push_summary("Project #4 has no tasks", "");
    assert_eq!(human.to_string(), "Task deleted\n\nSummary:\n- Project #4 has no tasks");
}
