use {
    crate::Tables,
    bigdecimal::BigDecimal,
    sqlx::{Executor, PgConnection},
};

/// One row per owner: points accrued through `deadline_time`, an hour
/// boundary in the configured accrual zone.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct IntegralSum {
    pub chain_id: i64,
    pub owner: String,
    pub integral: BigDecimal,
    pub deadline_time: i64,
}

pub async fn fetch_all(
    ex: &mut PgConnection,
    tables: &Tables,
) -> Result<Vec<IntegralSum>, sqlx::Error> {
    let query = format!(
        "SELECT chain_id, owner, integral, deadline_time \
         FROM \"{}\" ORDER BY owner;",
        tables.integral_sums()
    );
    sqlx::query_as(&query).fetch_all(ex).await
}

pub async fn fetch(
    ex: &mut PgConnection,
    tables: &Tables,
    owner: &str,
) -> Result<Option<IntegralSum>, sqlx::Error> {
    let query = format!(
        "SELECT chain_id, owner, integral, deadline_time \
         FROM \"{}\" WHERE owner = $1;",
        tables.integral_sums()
    );
    sqlx::query_as(&query).bind(owner).fetch_optional(ex).await
}

/// First-ever bucket for an owner. Uniqueness is by construction: the caller
/// only inserts for owners with no existing row.
pub async fn insert(
    ex: &mut PgConnection,
    tables: &Tables,
    row: &IntegralSum,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{}\" (chain_id, owner, integral, deadline_time) \
         VALUES ($1, $2, $3, $4);",
        tables.integral_sums()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(row.chain_id)
            .bind(&row.owner)
            .bind(&row.integral)
            .bind(row.deadline_time),
    )
    .await?;
    Ok(())
}

/// Closes the next hourly bucket: adds the freshly integrated points on top
/// of the stored total and moves the deadline forward.
pub async fn upsert_add(
    ex: &mut PgConnection,
    tables: &Tables,
    row: &IntegralSum,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{0}\" (chain_id, owner, integral, deadline_time) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (owner) \
         DO UPDATE SET integral = \"{0}\".integral + EXCLUDED.integral, \
                       deadline_time = EXCLUDED.deadline_time;",
        tables.integral_sums()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(row.chain_id)
            .bind(&row.owner)
            .bind(&row.integral)
            .bind(row.deadline_time),
    )
    .await?;
    Ok(())
}

/// Rewind path: a late balance row invalidated the stored total, so the
/// recomputed value replaces it outright.
pub async fn upsert_replace(
    ex: &mut PgConnection,
    tables: &Tables,
    row: &IntegralSum,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{}\" (chain_id, owner, integral, deadline_time) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (owner) \
         DO UPDATE SET integral = EXCLUDED.integral, \
                       deadline_time = EXCLUDED.deadline_time;",
        tables.integral_sums()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(row.chain_id)
            .bind(&row.owner)
            .bind(&row.integral)
            .bind(row.deadline_time),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::Connection,
        std::str::FromStr,
    };

    fn sum(owner: &str, integral: &str, deadline_time: i64) -> IntegralSum {
        IntegralSum {
            chain_id: 1,
            owner: owner.to_string(),
            integral: BigDecimal::from_str(integral).unwrap(),
            deadline_time,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn postgres_add_then_replace() {
        let tables = crate::Tables::new("test");
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        crate::testing::create_schema(&mut db, &tables).await.unwrap();
        let mut db = db.begin().await.unwrap();

        insert(&mut db, &tables, &sum("0xa", "2.00", 3_600)).await.unwrap();

        upsert_add(&mut db, &tables, &sum("0xa", "0.54", 7_200)).await.unwrap();
        let stored = fetch(&mut db, &tables, "0xa").await.unwrap().unwrap();
        assert_eq!(stored.integral, BigDecimal::from_str("2.54").unwrap());
        assert_eq!(stored.deadline_time, 7_200);

        upsert_replace(&mut db, &tables, &sum("0xa", "1.23", 10_800)).await.unwrap();
        let stored = fetch(&mut db, &tables, "0xa").await.unwrap().unwrap();
        assert_eq!(stored.integral, BigDecimal::from_str("1.23").unwrap());
        assert_eq!(stored.deadline_time, 10_800);

        assert_eq!(fetch_all(&mut db, &tables).await.unwrap().len(), 1);
    }
}
