use {
    crate::Tables,
    sqlx::{Executor, PgConnection},
};

/// One row in the `items_<chain>` table. The indexer only ever touches the
/// `owner` column; the rest of the row is maintained by the metadata service.
#[derive(Clone, Debug, Default, Eq, PartialEq, sqlx::FromRow)]
pub struct Item {
    pub collection_address: String,
    pub token_id: String,
    pub owner: String,
}

/// Moves ownership after a sale. `collection_address` and `owner` are
/// expected lower-cased; the item table stores lower-cased comparison keys.
pub async fn update_owner(
    ex: &mut PgConnection,
    tables: &Tables,
    collection_address: &str,
    token_id: &str,
    owner: &str,
) -> Result<u64, sqlx::Error> {
    let query = format!(
        "UPDATE \"{}\" SET owner = $3 \
         WHERE collection_address = $1 AND token_id = $2;",
        tables.items()
    );
    let result = ex
        .execute(
            sqlx::query(&query)
                .bind(collection_address)
                .bind(token_id)
                .bind(owner),
        )
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_ignore_conflicts(
    ex: &mut PgConnection,
    tables: &Tables,
    item: &Item,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "INSERT INTO \"{}\" (collection_address, token_id, owner) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (collection_address, token_id) DO NOTHING;",
        tables.items()
    );
    ex.execute(
        sqlx::query(&query)
            .bind(&item.collection_address)
            .bind(&item.token_id)
            .bind(&item.owner),
    )
    .await?;
    Ok(())
}

pub async fn fetch(
    ex: &mut PgConnection,
    tables: &Tables,
    collection_address: &str,
    token_id: &str,
) -> Result<Option<Item>, sqlx::Error> {
    let query = format!(
        "SELECT collection_address, token_id, owner \
         FROM \"{}\" WHERE collection_address = $1 AND token_id = $2;",
        tables.items()
    );
    sqlx::query_as(&query)
        .bind(collection_address)
        .bind(token_id)
        .fetch_optional(ex)
        .await
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        sqlx::Connection,
    };

    #[tokio::test]
    #[ignore]
    async fn postgres_owner_transfer() {
        let tables = crate::Tables::new("test");
        let mut db = PgConnection::connect("postgresql://").await.unwrap();
        crate::testing::create_schema(&mut db, &tables).await.unwrap();
        let mut db = db.begin().await.unwrap();

        let item = Item {
            collection_address: "0xcafe".to_string(),
            token_id: "7".to_string(),
            owner: "0xseller".to_string(),
        };
        insert_ignore_conflicts(&mut db, &tables, &item).await.unwrap();

        assert_eq!(
            update_owner(&mut db, &tables, "0xcafe", "7", "0xbuyer").await.unwrap(),
            1
        );
        let stored = fetch(&mut db, &tables, "0xcafe", "7").await.unwrap().unwrap();
        assert_eq!(stored.owner, "0xbuyer");

        // Unknown items are not created by ownership updates.
        assert_eq!(
            update_owner(&mut db, &tables, "0xcafe", "8", "0xbuyer").await.unwrap(),
            0
        );
    }
}
