// Monthly range-partition maintenance for append-only tables.
//
// usage_logs and rate_limit_violations are partitioned by month with a
// trailing pmax partition. Pre-creating the next month's partition keeps
// writes from landing in pmax around the boundary; dropping old partitions
// is how retention is enforced (a DROP PARTITION is metadata-only, unlike
// a ranged DELETE).

use chrono::{Datelike, NaiveDate};
use sqlx::{MySql, Pool, Row};

use crate::core::{AppError, Result};

/// Partition name for a month: `p202608`
pub fn partition_name(year: i32, month: u32) -> String {
    format!("p{:04}{:02}", year, month)
}

/// (year, month) of the month after the given one
pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// First day of a month
pub fn month_start(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::internal(format!("invalid month {}-{}", year, month)))
}

async fn partition_exists(pool: &Pool<MySql>, table: &str, name: &str) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM information_schema.partitions
        WHERE table_schema = DATABASE()
          AND table_name = ?
          AND partition_name = ?
        "#,
    )
    .bind(table)
    .bind(name)
    .fetch_one(pool)
    .await?;

    let count: i64 = row.try_get("n")?;
    Ok(count > 0)
}

/// Create the partition holding `(year, month)` if it does not exist yet,
/// by splitting it out of the trailing pmax partition. Idempotent.
pub async fn ensure_month_partition(
    pool: &Pool<MySql>,
    table: &str,
    year: i32,
    month: u32,
) -> Result<bool> {
    let name = partition_name(year, month);
    if partition_exists(pool, table, &name).await? {
        return Ok(false);
    }

    let (next_year, next_mon) = next_month(year, month);
    let upper_bound = month_start(next_year, next_mon)?;

    // Table and partition names cannot be bound as parameters; both are
    // internally generated, never caller input.
    let ddl = format!(
        "ALTER TABLE {table} REORGANIZE PARTITION pmax INTO (\
         PARTITION {name} VALUES LESS THAN (TO_DAYS('{upper}')),\
         PARTITION pmax VALUES LESS THAN MAXVALUE)",
        table = table,
        name = name,
        upper = upper_bound.format("%Y-%m-%d"),
    );
    sqlx::query(&ddl).execute(pool).await?;

    tracing::info!(table, partition = %name, "Created monthly partition");
    Ok(true)
}

/// Drop every monthly partition whose data is entirely older than
/// `cutoff`. Returns the number of partitions dropped.
pub async fn drop_partitions_before(
    pool: &Pool<MySql>,
    table: &str,
    cutoff: NaiveDate,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        SELECT partition_name
        FROM information_schema.partitions
        WHERE table_schema = DATABASE()
          AND table_name = ?
          AND partition_name IS NOT NULL
          AND partition_name != 'pmax'
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    let mut dropped = 0u64;
    for row in rows {
        let name: String = row.try_get("partition_name")?;
        let Some((year, month)) = parse_partition_name(&name) else {
            continue;
        };
        // A partition is droppable once the following month is still
        // before the cutoff, i.e. its newest possible row is too old.
        let (next_year, next_mon) = next_month(year, month);
        let upper_bound = month_start(next_year, next_mon)?;
        if upper_bound <= cutoff {
            let ddl = format!("ALTER TABLE {} DROP PARTITION {}", table, name);
            sqlx::query(&ddl).execute(pool).await?;
            tracing::info!(table, partition = %name, "Dropped expired partition");
            dropped += 1;
        }
    }

    Ok(dropped)
}

fn parse_partition_name(name: &str) -> Option<(i32, u32)> {
    let digits = name.strip_prefix('p')?;
    if digits.len() != 6 {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let month: u32 = digits[4..].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some((year, month))
}

/// Current and next month as seen from `today`, for pre-creation
pub fn months_to_maintain(today: NaiveDate) -> [(i32, u32); 2] {
    let current = (today.year(), today.month());
    let next = next_month(current.0, current.1);
    [current, next]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_format() {
        assert_eq!(partition_name(2026, 8), "p202608");
        assert_eq!(partition_name(2026, 12), "p202612");
    }

    #[test]
    fn test_next_month_wraps_year() {
        assert_eq!(next_month(2026, 12), (2027, 1));
        assert_eq!(next_month(2026, 1), (2026, 2));
    }

    #[test]
    fn test_parse_partition_name() {
        assert_eq!(parse_partition_name("p202608"), Some((2026, 8)));
        assert_eq!(parse_partition_name("pmax"), None);
        assert_eq!(parse_partition_name("p20260"), None);
        assert_eq!(parse_partition_name("p202613"), None);
    }

    #[test]
    fn test_months_to_maintain() {
        let today = NaiveDate::from_ymd_opt(2026, 12, 15).unwrap();
        assert_eq!(months_to_maintain(today), [(2026, 12), (2027, 1)]);
    }
}
