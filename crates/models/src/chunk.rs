use sea_orm::{entity::prelude::*, ConnectionTrait, QuerySelect, Set};
use uuid::Uuid;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{errors, file};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunk")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub file_id: Uuid,
    pub bytes: Vec<u8>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter)]
pub enum Relation {
    File,
}

impl RelationTrait for Relation {
    fn def(&self) -> RelationDef {
        match self { Relation::File => Entity::belongs_to(file::Entity).from(Column::FileId).to(file::Column::Id).into() }
    }
}

impl Related<file::Entity> for Entity {
    fn to() -> RelationDef { Relation::File.def() }
}

impl ActiveModelBehavior for ActiveModel {}

pub async fn create<C: ConnectionTrait>(db: &C, file_id: Uuid, bytes: &[u8]) -> Result<Model, errors::ModelError> {
    if bytes.is_empty() { return Err(errors::ModelError::Validation("chunk must not be empty".into())); }
    let now = Utc::now().into();
    let am = ActiveModel {
        id: Set(Uuid::new_v4()),
        file_id: Set(file_id),
        bytes: Set(bytes.to_vec()),
        created_at: Set(now),
        updated_at: Set(now),
    };
    Ok(am.insert(db).await?)
}

/// Fetch only the payload column of one chunk.
pub async fn find_bytes<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Vec<u8>>, errors::ModelError> {
    let bytes = Entity::find_by_id(id)
        .select_only()
        .column(Column::Bytes)
        .into_tuple::<Vec<u8>>()
        .one(db)
        .await?;
    Ok(bytes)
}

pub async fn delete_by_file<C: ConnectionTrait>(db: &C, file_id: Uuid) -> Result<u64, errors::ModelError> {
    let res = Entity::delete_many().filter(Column::FileId.eq(file_id)).exec(db).await?;
    Ok(res.rows_affected)
}
