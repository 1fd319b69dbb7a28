//! Queries over the `days` table and the day-color catalog.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use orgd_schemas::DayColorDefinition;

#[derive(Debug, Clone)]
pub struct DayRow {
    pub date: NaiveDate,
    pub user_id: Uuid,
    pub color: Option<String>,
    pub notes: Option<String>,
    pub report: Option<String>,
}

/// Fetch the diary row for one date. `None` if the user never wrote to that
/// day; the service synthesizes an empty day in that case.
pub async fn fetch_day(pool: &PgPool, user: Uuid, date: NaiveDate) -> Result<Option<DayRow>> {
    let row = sqlx::query(
        "select date, user_id, color, notes, report from days where user_id = $1 and date = $2",
    )
    .bind(user)
    .bind(date)
    .fetch_optional(pool)
    .await
    .context("fetch_day failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(DayRow {
        date: row.try_get("date")?,
        user_id: row.try_get("user_id")?,
        color: row.try_get("color")?,
        notes: row.try_get("notes")?,
        report: row.try_get("report")?,
    }))
}

/// Summary row for month listings: presence flags instead of the bodies.
#[derive(Debug, Clone)]
pub struct MonthDayRow {
    pub date: NaiveDate,
    pub user_id: Uuid,
    pub color: Option<String>,
    pub has_notes: bool,
    pub has_report: bool,
}

/// Diary rows for one calendar month, ordered by date. `month` is 1-based
/// here; the wire's 0-based month is converted before this call.
pub async fn month_days(pool: &PgPool, user: Uuid, year: i32, month: u32) -> Result<Vec<MonthDayRow>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("invalid month {year}-{month}"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .with_context(|| format!("invalid month {year}-{month}"))?;

    let rows = sqlx::query(
        r#"
        select date, user_id, color,
               (notes is not null) as has_notes,
               (report is not null) as has_report
          from days
         where user_id = $1 and date >= $2 and date < $3
         order by date
        "#,
    )
    .bind(user)
    .bind(first)
    .bind(next)
    .fetch_all(pool)
    .await
    .context("month_days failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(MonthDayRow {
            date: row.try_get("date")?,
            user_id: row.try_get("user_id")?,
            color: row.try_get("color")?,
            has_notes: row.try_get("has_notes")?,
            has_report: row.try_get("has_report")?,
        });
    }
    Ok(out)
}

/// Upsert only the color of a day. `None` writes NULL (clears the color)
/// without touching notes/report.
pub async fn upsert_day_color(
    pool: &PgPool,
    user: Uuid,
    date: NaiveDate,
    color: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into days (date, user_id, color)
        values ($1, $2, $3)
        on conflict (date, user_id) do update
            set color = excluded.color
        "#,
    )
    .bind(date)
    .bind(user)
    .bind(color)
    .execute(pool)
    .await
    .context("upsert_day_color failed")?;
    Ok(())
}

/// Upsert the full diary record for a day. `None` fields write NULL.
pub async fn upsert_day(
    pool: &PgPool,
    user: Uuid,
    date: NaiveDate,
    color: Option<&str>,
    notes: Option<&str>,
    report: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into days (date, user_id, color, notes, report)
        values ($1, $2, $3, $4, $5)
        on conflict (date, user_id) do update
            set color  = excluded.color,
                notes  = excluded.notes,
                report = excluded.report
        "#,
    )
    .bind(date)
    .bind(user)
    .bind(color)
    .bind(notes)
    .bind(report)
    .execute(pool)
    .await
    .context("upsert_day failed")?;
    Ok(())
}

/// The global color catalog, best score first.
pub async fn day_color_definitions(pool: &PgPool) -> Result<Vec<DayColorDefinition>> {
    let rows = sqlx::query(
        r#"
        select id, name, color, score
          from day_colors
         where tenant_id is null
         order by score desc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("day_color_definitions failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(DayColorDefinition {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            score: row.try_get("score")?,
        });
    }
    Ok(out)
}
