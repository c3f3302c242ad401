use sea_orm::{entity::prelude::*, sea_query::Expr, ConnectionTrait, Set};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{chunk, errors};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub size: i64,
    /// Chunk order == byte order of the content.
    pub chunk_ids: Vec<Uuid>,
    pub metadata: Option<Vec<u8>>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    Chunk,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self { Relation::Chunk => Entity::has_many(chunk::Entity).into() }
    }
}

impl Related<chunk::Entity> for Entity {
    fn to() -> RelationDef { Relation::Chunk.def() }
}

impl ActiveModelBehavior for ActiveModel {}

/// Insert an empty file row; size and chunk list are filled by `finish`.
pub async fn create_empty<C: ConnectionTrait>(db: &C) -> Result<Model, errors::ModelError> {
    let now = Utc::now().into();
    let am = ActiveModel {
        id: Set(Uuid::new_v4()),
        size: Set(0),
        chunk_ids: Set(Vec::new()),
        metadata: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    Ok(am.insert(db).await?)
}

/// Record final size and ordered chunk ids in one statement. Returns rows affected.
pub async fn finish<C: ConnectionTrait>(db: &C, id: Uuid, size: i64, chunk_ids: &[Uuid]) -> Result<u64, errors::ModelError> {
    if size < 0 {
        return Err(errors::ModelError::Validation("size must be non-negative".into()));
    }
    let now: DateTimeWithTimeZone = Utc::now().into();
    let res = Entity::update_many()
        .col_expr(Column::Size, Expr::value(size))
        .col_expr(Column::ChunkIds, Expr::value(chunk_ids.to_vec()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn set_metadata<C: ConnectionTrait>(db: &C, id: Uuid, metadata: Option<Vec<u8>>) -> Result<u64, errors::ModelError> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let res = Entity::update_many()
        .col_expr(Column::Metadata, Expr::value(metadata))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

pub async fn find<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Model>, errors::ModelError> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

pub async fn hard_delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, errors::ModelError> {
    let res = Entity::delete_by_id(id).exec(db).await?;
    Ok(res.rows_affected)
}
