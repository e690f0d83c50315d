use crate::models::OptimizeResponse;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print an optimization result in the specified format
pub fn print_response(response: &OptimizeResponse, format: OutputFormat) {
    match format {
        OutputFormat::Plain => {
            if let Err(e) = write_plain(&mut std::io::stdout().lock(), response) {
                eprintln!("Error writing result: {}", e);
            }
        }
        OutputFormat::Json => print_json(response),
    }
}

/// Write an optimization result as a plain text summary
pub fn write_plain<W: Write>(out: &mut W, response: &OptimizeResponse) -> io::Result<()> {
    let program = &response.optimized_program;

    writeln!(out, "=== Optimization Result ===")?;
    writeln!(out)?;
    writeln!(out, "Optimizer:  {}", program.optimizer_type)?;
    writeln!(out, "Best score: {:.3}", response.best_score)?;
    writeln!(out, "Time:       {} ms", program.optimization_time)?;
    writeln!(out, "Examples:   {}", program.examples.len())?;
    writeln!(out)?;

    writeln!(out, "INSTRUCTION")?;
    writeln!(out, "-----------")?;
    match &program.instruction {
        Some(instruction) => writeln!(out, "{}", instruction)?,
        None => writeln!(out, "No instruction found.")?,
    }
    writeln!(out)?;

    writeln!(out, "CANDIDATES")?;
    writeln!(out, "----------")?;
    match response.stats.as_deref() {
        Some(scores) if !scores.is_empty() => {
            writeln!(out, "{:<10} {:<8}", "Candidate", "Score")?;
            writeln!(out, "{}", "-".repeat(19))?;
            for (i, score) in scores.iter().enumerate() {
                writeln!(out, "{:<10} {:<8.3}", i, score)?;
            }
        }
        _ => writeln!(out, "No candidate scores available.")?,
    }

    Ok(())
}

fn print_json(response: &OptimizeResponse) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing result to JSON: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OptimizedProgram;

    fn create_test_response(instruction: Option<&str>, stats: Option<Vec<f64>>) -> OptimizeResponse {
        OptimizeResponse {
            best_score: 0.8,
            optimized_program: OptimizedProgram {
                best_score: 0.8,
                instruction: instruction.map(str::to_string),
                demos: vec![],
                examples: vec![serde_json::json!({"conversationContext": "hi"})],
                optimizer_type: "GEPA".to_string(),
                optimization_time: 1234,
                total_rounds: None,
                converged: None,
                stats: stats.clone(),
            },
            stats,
        }
    }

    fn render(response: &OptimizeResponse) -> String {
        let mut buf = Vec::new();
        write_plain(&mut buf, response).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_plain_output_summary() {
        let text = render(&create_test_response(
            Some("Reply briefly."),
            Some(vec![0.25, 0.8]),
        ));

        assert!(text.contains("Best score: 0.800"));
        assert!(text.contains("Time:       1234 ms"));
        assert!(text.contains("Examples:   1"));
        assert!(text.contains("Reply briefly."));
        assert!(text.contains("0          0.250"));
        assert!(text.contains("1          0.800"));
    }

    #[test]
    fn test_plain_output_without_instruction_or_scores() {
        let text = render(&create_test_response(None, None));
        assert!(text.contains("No instruction found."));
        assert!(text.contains("No candidate scores available."));
    }

    #[test]
    fn test_print_response_formats() {
        let response = create_test_response(Some("x"), Some(vec![]));
        print_response(&response, OutputFormat::Plain);
        print_response(&response, OutputFormat::Json);
    }
}
