//! Question bank commands.

use super::{into_anyhow, Context};
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use clap::Args;
use qbank_api::{EvaluationRequest, Question, QuestionDraft};
use qbank_auth::Action;

/// Question fields accepted by `create` and `update`.
#[derive(Debug, Default, Clone, Args)]
pub struct QuestionFields {
    /// Category, e.g. "rust"
    #[arg(long)]
    pub category: Option<String>,
    /// Competency being assessed
    #[arg(long)]
    pub competency: Option<String>,
    /// Difficulty (easy, medium, hard)
    #[arg(long)]
    pub difficulty: Option<String>,
    /// Question text
    #[arg(long)]
    pub text: Option<String>,
    /// Reference answer used by the evaluator
    #[arg(long)]
    pub reference_answer: Option<String>,
}

impl QuestionFields {
    /// Build a complete draft. Only the reference answer may be omitted.
    fn into_draft(self) -> Result<QuestionDraft> {
        Ok(QuestionDraft {
            category: self.category.context("--category is required")?,
            competency: self.competency.context("--competency is required")?,
            difficulty: self.difficulty.context("--difficulty is required")?,
            question_text: self.text.context("--text is required")?,
            reference_answer: self.reference_answer.unwrap_or_default(),
        })
    }

    /// Overlay the given fields on an existing question.
    fn merge_into(self, question: Question) -> QuestionDraft {
        QuestionDraft {
            category: self.category.unwrap_or(question.category),
            competency: self.competency.unwrap_or(question.competency),
            difficulty: self.difficulty.unwrap_or(question.difficulty),
            question_text: self.text.unwrap_or(question.question_text),
            reference_answer: self.reference_answer.unwrap_or(question.reference_answer),
        }
    }

    fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.competency.is_none()
            && self.difficulty.is_none()
            && self.text.is_none()
            && self.reference_answer.is_none()
    }
}

/// List questions.
pub async fn questions_list(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let questions = ctx.api.list_questions().await.map_err(into_anyhow)?;

    match format {
        OutputFormat::Text => {
            if questions.is_empty() {
                println!("No questions found.");
                return Ok(());
            }
            output::print_heading(&format!("Questions ({})", questions.len()));
            for question in &questions {
                println!(
                    "  {:<38} {:<10} {:<16} {}",
                    question.id, question.difficulty, question.category, question.question_text
                );
            }
        }
        OutputFormat::Json => output::print_json(&questions),
    }
    Ok(())
}

/// Show one question.
pub async fn questions_show(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    let question = ctx.api.get_question(id).await.map_err(into_anyhow)?;

    match format {
        OutputFormat::Text => {
            output::print_heading("Question");
            output::print_row("ID", &question.id);
            output::print_row("Category", &question.category);
            output::print_row("Competency", &question.competency);
            output::print_row("Difficulty", &question.difficulty);
            output::print_row("Created", &question.create_at);
            println!();
            println!("{}", question.question_text);
            if ctx.auth.can(Action::UpdateQuestion) {
                println!();
                println!("Reference answer:");
                println!("{}", question.reference_answer);
            }
        }
        OutputFormat::Json => output::print_json(&question),
    }
    Ok(())
}

/// Create a question. Admins only.
pub async fn questions_create(ctx: &Context, fields: QuestionFields, format: &OutputFormat) -> Result<()> {
    if !ctx.auth.can(Action::CreateQuestion) {
        anyhow::bail!("Creating questions requires the Admin role");
    }

    let draft = fields.into_draft()?;
    let question = ctx.api.create_question(&draft).await.map_err(into_anyhow)?;
    match format {
        OutputFormat::Text => output::print_success(&format!("Question {} created", question.id), format),
        OutputFormat::Json => output::print_json(&question),
    }
    Ok(())
}

/// Update selected fields of a question. Admins only.
pub async fn questions_update(
    ctx: &Context,
    id: &str,
    fields: QuestionFields,
    format: &OutputFormat,
) -> Result<()> {
    if !ctx.auth.can(Action::UpdateQuestion) {
        anyhow::bail!("Updating questions requires the Admin role");
    }
    if fields.is_empty() {
        anyhow::bail!("Nothing to update; pass at least one field");
    }

    // The API replaces the whole record, so unchanged fields come from the current copy.
    let current = ctx.api.get_question(id).await.map_err(into_anyhow)?;
    let draft = fields.merge_into(current);
    let question = ctx.api.update_question(id, &draft).await.map_err(into_anyhow)?;
    match format {
        OutputFormat::Text => output::print_success(&format!("Question {} updated", question.id), format),
        OutputFormat::Json => output::print_json(&question),
    }
    Ok(())
}

/// Delete a question. Admins only.
pub async fn questions_delete(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    if !ctx.auth.can(Action::DeleteQuestion) {
        anyhow::bail!("Deleting questions requires the Admin role");
    }

    ctx.api.delete_question(id).await.map_err(into_anyhow)?;
    output::print_success(&format!("Question {} deleted", id), format);
    Ok(())
}

/// Submit an answer to a question for evaluation.
pub async fn answer(
    ctx: &Context,
    question_id: &str,
    answer: &str,
    competency_type: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    if !ctx.auth.can(Action::SubmitAnswer) {
        anyhow::bail!("Log in with 'qbank login' to submit answers");
    }

    let question = ctx.api.get_question(question_id).await.map_err(into_anyhow)?;
    let request = EvaluationRequest {
        question: question.question_text,
        answer: answer.to_string(),
        competency_type: competency_type.map(str::to_string),
    };
    let evaluation = ctx.api.evaluate_answer(&request).await.map_err(into_anyhow)?;

    match format {
        OutputFormat::Text => {
            output::print_heading("Evaluation");
            output::print_row("Correct", if evaluation.is_correct { "yes" } else { "no" });
            output::print_row("Score", &format!("{:.1}", evaluation.score));
            for (title, items) in [
                ("Strengths", &evaluation.strengths),
                ("Improvements", &evaluation.improvements),
                ("Suggestions", &evaluation.suggestions),
            ] {
                if items.is_empty() {
                    continue;
                }
                println!("\n{}:", title);
                for item in items {
                    println!("  - {}", item);
                }
            }
            if !evaluation.marcus_comment.is_empty() {
                println!("\n{}", evaluation.marcus_comment);
            }
        }
        OutputFormat::Json => output::print_json(&evaluation),
    }
    Ok(())
}
