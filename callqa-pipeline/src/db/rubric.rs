//! Rubric group and question database operations
//!
//! The pipeline consumes this configuration read-only; the upserts exist
//! for the admin surface and for seeding.

use callqa_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{RubricGroup, RubricQuestion};

use super::parse_uuid;

fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> Result<RubricGroup> {
    let id: String = row.get("id");
    Ok(RubricGroup {
        id: parse_uuid(&id, "id")?,
        name: row.get("name"),
        display_name: row.get("display_name"),
        system_prompt: row.get("system_prompt"),
    })
}

fn row_to_question(row: &sqlx::sqlite::SqliteRow) -> Result<RubricQuestion> {
    let group_id: String = row.get("group_id");
    let good_examples: String = row.get("good_examples");
    let bad_examples: String = row.get("bad_examples");
    let possible_answers: String = row.get("possible_answers");

    let parse_list = |raw: &str, column: &str| -> Result<Vec<String>> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
    };

    Ok(RubricQuestion {
        question_id: row.get("question_id"),
        group_id: parse_uuid(&group_id, "group_id")?,
        question: row.get("question"),
        context: row.get("context"),
        reference_script: row.get("reference_script"),
        good_examples: parse_list(&good_examples, "good_examples")?,
        bad_examples: parse_list(&bad_examples, "bad_examples")?,
        possible_answers: parse_list(&possible_answers, "possible_answers")?,
        sort_order: row.get("sort_order"),
        is_active: row.get::<i64, _>("is_active") != 0,
    })
}

/// Load a rubric group by id
pub async fn get_group(pool: &SqlitePool, id: Uuid) -> Result<Option<RubricGroup>> {
    let row = sqlx::query("SELECT * FROM question_groups WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_group).transpose()
}

/// Active questions of a group in rubric order
pub async fn list_active_questions(
    pool: &SqlitePool,
    group_id: Uuid,
) -> Result<Vec<RubricQuestion>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM questions
        WHERE group_id = ? AND is_active = 1
        ORDER BY sort_order ASC, question_id ASC
        "#,
    )
    .bind(group_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_question).collect()
}

/// Upsert a rubric group
pub async fn upsert_group(pool: &SqlitePool, group: &RubricGroup) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO question_groups (id, name, display_name, system_prompt)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            display_name = excluded.display_name,
            system_prompt = excluded.system_prompt
        "#,
    )
    .bind(group.id.to_string())
    .bind(&group.name)
    .bind(&group.display_name)
    .bind(&group.system_prompt)
    .execute(pool)
    .await?;

    Ok(())
}

/// Upsert a rubric question
pub async fn upsert_question(pool: &SqlitePool, question: &RubricQuestion) -> Result<()> {
    let encode = |list: &[String], column: &str| -> Result<String> {
        serde_json::to_string(list)
            .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", column, e)))
    };

    sqlx::query(
        r#"
        INSERT INTO questions (
            question_id, group_id, question, context, reference_script,
            good_examples, bad_examples, possible_answers, sort_order, is_active
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(question_id) DO UPDATE SET
            group_id = excluded.group_id,
            question = excluded.question,
            context = excluded.context,
            reference_script = excluded.reference_script,
            good_examples = excluded.good_examples,
            bad_examples = excluded.bad_examples,
            possible_answers = excluded.possible_answers,
            sort_order = excluded.sort_order,
            is_active = excluded.is_active
        "#,
    )
    .bind(&question.question_id)
    .bind(question.group_id.to_string())
    .bind(&question.question)
    .bind(&question.context)
    .bind(&question.reference_script)
    .bind(encode(&question.good_examples, "good_examples")?)
    .bind(encode(&question.bad_examples, "bad_examples")?)
    .bind(encode(&question.possible_answers, "possible_answers")?)
    .bind(question.sort_order)
    .bind(i64::from(question.is_active))
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::memory_pool;

    fn question(group_id: Uuid, question_id: &str, sort_order: i64, active: bool) -> RubricQuestion {
        RubricQuestion {
            question_id: question_id.to_string(),
            group_id,
            question: format!("Pytanie {}", question_id),
            context: String::new(),
            reference_script: None,
            good_examples: vec![],
            bad_examples: vec![],
            possible_answers: vec!["Tak".to_string(), "Nie".to_string()],
            sort_order,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn test_active_questions_ordered() {
        let pool = memory_pool().await;
        let group_id = Uuid::new_v4();

        upsert_group(
            &pool,
            &RubricGroup {
                id: group_id,
                name: "sprzedaz".to_string(),
                display_name: "Sprzedaz".to_string(),
                system_prompt: "Jestes audytorem jakosci.".to_string(),
            },
        )
        .await
        .unwrap();

        upsert_question(&pool, &question(group_id, "q2", 2, true))
            .await
            .unwrap();
        upsert_question(&pool, &question(group_id, "q1", 1, true))
            .await
            .unwrap();
        upsert_question(&pool, &question(group_id, "q3", 3, false))
            .await
            .unwrap();

        let questions = list_active_questions(&pool, group_id).await.unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question_id, "q1");
        assert_eq!(questions[1].question_id, "q2");
    }
}
