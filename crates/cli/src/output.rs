//! Output formatting for CLI results

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use serde_json::json;

use testgrid_common::{DataRow, ExecutionStatus, StepStatus, TestExecution, TestStepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn print_execution(
    execution: &TestExecution,
    results: &[TestStepResult],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let doc = json!({ "execution": execution, "steps": results });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Table => {
            println!(
                "Execution {} [{}] {}",
                execution.id,
                execution.environment,
                execution_status(execution.status)
            );
            if let Some(device) = &execution.device_id {
                println!("Resource: {}", device);
            }
            if let Some(duration) = execution.duration_ms {
                println!("Duration: {} ms", duration);
            }
            if let Some(message) = &execution.error_message {
                println!("Message: {}", message);
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["#", "Row", "Action", "Element", "Status", "Message"]);
            for result in results {
                table.add_row(vec![
                    Cell::new(result.step_number),
                    Cell::new(
                        result
                            .row_index
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    Cell::new(&result.action),
                    Cell::new(&result.element),
                    Cell::new(step_status(result.status)),
                    Cell::new(&result.message),
                ]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

pub fn print_rows(rows: &[DataRow], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?);
        }
        OutputFormat::Table => {
            let Some(first) = rows.first() else {
                println!("(no rows)");
                return Ok(());
            };
            let headers: Vec<String> = first.keys().cloned().collect();
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(&headers);
            for row in rows {
                table.add_row(
                    headers
                        .iter()
                        .map(|h| match row.get(h) {
                            Some(serde_json::Value::String(s)) => s.clone(),
                            Some(serde_json::Value::Null) | None => String::new(),
                            Some(other) => other.to_string(),
                        })
                        .collect::<Vec<_>>(),
                );
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn execution_status(status: ExecutionStatus) -> String {
    let text = status.to_string();
    match status {
        ExecutionStatus::Passed => text.green().bold().to_string(),
        ExecutionStatus::Failed | ExecutionStatus::Error => text.red().bold().to_string(),
        ExecutionStatus::Blocked | ExecutionStatus::Stopped => text.yellow().bold().to_string(),
        _ => text,
    }
}

fn step_status(status: StepStatus) -> String {
    let text = status.to_string();
    match status {
        StepStatus::Passed => text.green().to_string(),
        StepStatus::Failed | StepStatus::Error => text.red().to_string(),
        StepStatus::Skipped => text.yellow().to_string(),
        _ => text,
    }
}
