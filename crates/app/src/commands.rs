use anyhow::{bail, Result};
use finsight_core::{ContentSignature, StatementClass};
use finsight_pipeline::{ClassOutcome, ClassReport, Edit, EditTarget, Orchestrator, Selection};
use std::collections::BTreeMap;
use std::process::ExitCode;

use crate::{CategoriesCommand, EditArgs, RulesCommand};

pub async fn run(orchestrator: &Orchestrator, selection: Selection) -> Result<ExitCode> {
    let report = orchestrator.run(selection).await;
    print_reports(&report.classes);
    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn reprocess(orchestrator: &Orchestrator, class: StatementClass) -> Result<ExitCode> {
    let report = orchestrator.reprocess(class).await;
    print_reports(std::slice::from_ref(&report));
    Ok(match report.outcome {
        ClassOutcome::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn print_reports(classes: &[ClassReport]) {
    for class in classes {
        match &class.outcome {
            ClassOutcome::Success(stats) => {
                println!(
                    "{}: {} file(s), {} new, {} duplicate, {} deleted, {} filtered, {} skipped; gold has {} row(s)",
                    class.class,
                    stats.files,
                    stats.new_count,
                    stats.duplicate_count,
                    stats.deleted,
                    stats.filtered_rows,
                    stats.skipped_rows,
                    stats.gold_rows,
                );
                for file in &stats.failed_files {
                    println!("{}: could not read {file}", class.class);
                }
                if stats.fallback_batches > 0 {
                    println!(
                        "{}: {} batch(es) left Uncategorized",
                        class.class, stats.fallback_batches
                    );
                }
            }
            ClassOutcome::NoFiles => println!("{}: no uploaded files", class.class),
            ClassOutcome::Failed { stage, error } => {
                println!("{}: failed while {stage}: {error}", class.class)
            }
        }
    }
}

pub async fn regenerate(orchestrator: &Orchestrator, class: StatementClass) -> Result<ExitCode> {
    let gold = orchestrator.regenerate_gold(class).await?;
    println!(
        "{class}: gold has {} row(s), {} edited",
        gold.rows.len(),
        gold.overridden
    );
    Ok(ExitCode::SUCCESS)
}

pub async fn edit(orchestrator: &Orchestrator, args: EditArgs) -> Result<ExitCode> {
    let target = match (args.id, args.date, args.description, args.amount) {
        (Some(id), ..) => EditTarget::Id(id),
        (None, Some(date), Some(description), Some(amount)) => {
            EditTarget::Signature(ContentSignature::new(date, &description, amount))
        }
        _ => bail!("An edit needs --id, or --date, --description and --amount"),
    };
    let mut changes = BTreeMap::new();
    if let Some(category) = args.category {
        changes.insert("category".to_string(), category);
    }
    if let Some(description) = args.new_description {
        changes.insert("description".to_string(), description);
    }
    if changes.is_empty() {
        bail!("Nothing to change: pass --category and/or --new-description");
    }

    let applied = orchestrator
        .record_edit(Edit {
            class: args.class,
            target,
            changes,
        })
        .await?;
    if applied {
        println!("{}: edit recorded", args.class);
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: no matching row", args.class);
        Ok(ExitCode::FAILURE)
    }
}

pub async fn rules(orchestrator: &Orchestrator, action: RulesCommand) -> Result<ExitCode> {
    let rules = orchestrator.rules();
    match action {
        RulesCommand::List => {
            println!("{}", serde_json::to_string_pretty(&rules.list().await?)?);
        }
        RulesCommand::Add {
            content,
            applies_to,
        } => {
            let rule = rules.add(&content, applies_to).await?;
            println!("{}", serde_json::to_string_pretty(&rule)?);
        }
        RulesCommand::Update {
            id,
            content,
            applies_to,
        } => match rules.update(id, content.as_deref(), applies_to).await? {
            Some(rule) => println!("{}", serde_json::to_string_pretty(&rule)?),
            None => bail!("No rule with id {id}"),
        },
        RulesCommand::Delete { id } => {
            if !rules.delete(id).await? {
                bail!("No rule with id {id}");
            }
            println!("Deleted rule {id}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn categories(orchestrator: &Orchestrator, action: CategoriesCommand) -> Result<ExitCode> {
    let categories = orchestrator.categories();
    match action {
        CategoriesCommand::List => {
            let names = categories.list().await?;
            println!("{}", serde_json::to_string_pretty(&names)?);
        }
        CategoriesCommand::Add { name } => {
            if !categories.add(&name).await? {
                bail!("Category '{}' already exists", name.trim());
            }
            println!("Added category {}", name.trim());
        }
        CategoriesCommand::Delete { name } => {
            if !categories.delete(&name).await? {
                bail!("No category named '{}'", name.trim());
            }
            println!("Deleted category {}", name.trim());
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn stats(orchestrator: &Orchestrator, selection: Selection) -> Result<ExitCode> {
    let classes: &[StatementClass] = match selection {
        Selection::Credit => &[StatementClass::Credit],
        Selection::Debit => &[StatementClass::Debit],
        Selection::All => &StatementClass::ALL,
    };
    let mut out = BTreeMap::new();
    for &class in classes {
        out.insert(class, orchestrator.stats(class).await?);
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(ExitCode::SUCCESS)
}
