//! Formats command - built-in and saved formats

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use ledger_import_core::services::KnownFormat;

use super::{get_context, log_command};
use crate::output;

#[derive(Subcommand)]
pub enum FormatsCommands {
    /// List every known format (default)
    List,
    /// Show the mapping of one format
    Show {
        /// Format id (e.g. chase_checking)
        id: String,
    },
}

pub fn run(command: Option<FormatsCommands>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "formats");
    let formats = ctx.import_service.known_formats()?;

    match command.unwrap_or(FormatsCommands::List) {
        FormatsCommands::List => {
            if json {
                return output::print_json(&formats);
            }
            let mut table = output::create_table();
            table.set_header(vec!["Id", "Name", "Source"]);
            for format in &formats {
                let source = if format.builtin {
                    "built-in".normal()
                } else {
                    "saved".green()
                };
                table.add_row(vec![format.id.clone(), format.name.clone(), source.to_string()]);
            }
            println!("{}", table);
        }
        FormatsCommands::Show { id } => {
            let format = formats
                .into_iter()
                .find(|f| f.id == id)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {}", id))?;
            if json {
                return output::print_json(&format);
            }
            print_format(&format);
        }
    }
    Ok(())
}

fn print_format(format: &KnownFormat) {
    let m = &format.mapping;
    println!("{} ({})", format.name.bold(), format.id);
    let show = |label: &str, column: &Option<String>| {
        if let Some(c) = column {
            println!("  {}: {}", label, c);
        }
    };
    show("Date", &m.date_column);
    println!("  Date format: {}", m.date_format_pattern);
    show("Amount", &m.amount_column);
    show("Debit", &m.debit_column);
    show("Credit", &m.credit_column);
    println!("  Sign convention: {}", m.amount_sign_convention.as_str());
    show("Description", &m.description_column);
    show("Reference", &m.reference_column);
    show("Category", &m.category_column);
    if m.skip_header_rows > 0 || m.skip_footer_rows > 0 {
        println!(
            "  Skipped rows: {} header, {} footer",
            m.skip_header_rows, m.skip_footer_rows
        );
    }
    if m.invert_sign {
        println!("  Signs inverted");
    }
}
