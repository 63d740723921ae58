//! Product -> course resolution, read through a short-lived cache.

use std::time::Duration;

use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    sea_query::OnConflict,
};

use crate::entity::{course, product_course_mapping};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    pub product_id: String,
    pub course: course::Model,
    pub is_active: bool,
}

/// Negative lookups are cached as `None` as well.
#[derive(Clone)]
pub struct ProductMappings {
    cache: moka::sync::Cache<String, Option<ResolvedMapping>>,
}

impl ProductMappings {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: moka::sync::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn resolve<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: &str,
    ) -> Result<Option<ResolvedMapping>, DbErr> {
        if let Some(cached) = self.cache.get(product_id) {
            return Ok(cached);
        }

        let row = product_course_mapping::Entity::find()
            .filter(product_course_mapping::Column::StripeProductId.eq(product_id))
            .find_also_related(course::Entity)
            .one(db)
            .await?;

        let resolved = match row {
            Some((mapping, Some(course))) => Some(ResolvedMapping {
                product_id: mapping.stripe_product_id,
                course,
                is_active: mapping.is_active,
            }),
            Some((mapping, None)) => {
                tracing::warn!(
                    product_id,
                    course_id = %mapping.course_id,
                    "Product mapping points at a missing course"
                );
                None
            }
            None => None,
        };

        self.cache.insert(product_id.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Inactive mappings resolve to `None`, exactly like missing ones.
    pub async fn resolve_active<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: &str,
    ) -> Result<Option<course::Model>, DbErr> {
        Ok(self
            .resolve(db, product_id)
            .await?
            .filter(|mapping| mapping.is_active)
            .map(|mapping| mapping.course))
    }

    pub fn invalidate(&self, product_id: &str) {
        self.cache.invalidate(product_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub async fn upsert<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: &str,
        course_id: &str,
        is_active: bool,
    ) -> Result<product_course_mapping::Model, DbErr> {
        let now = chrono::Utc::now().naive_utc();
        let mapping = product_course_mapping::ActiveModel {
            id: Set(course_hub_types::create_id()),
            stripe_product_id: Set(product_id.to_string()),
            course_id: Set(course_id.to_string()),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        product_course_mapping::Entity::insert(mapping)
            .on_conflict(
                OnConflict::column(product_course_mapping::Column::StripeProductId)
                    .update_columns([
                        product_course_mapping::Column::CourseId,
                        product_course_mapping::Column::IsActive,
                        product_course_mapping::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        self.invalidate(product_id);

        product_course_mapping::Entity::find()
            .filter(product_course_mapping::Column::StripeProductId.eq(product_id))
            .one(db)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("ProductCourseMapping {product_id}")))
    }

    /// Returns whether a mapping for `product_id` exists.
    pub async fn set_active<C: ConnectionTrait>(
        &self,
        db: &C,
        product_id: &str,
        is_active: bool,
    ) -> Result<bool, DbErr> {
        let result = product_course_mapping::Entity::update_many()
            .set(product_course_mapping::ActiveModel {
                is_active: Set(is_active),
                updated_at: Set(chrono::Utc::now().naive_utc()),
                ..Default::default()
            })
            .filter(product_course_mapping::Column::StripeProductId.eq(product_id))
            .exec(db)
            .await?;

        self.invalidate(product_id);
        Ok(result.rows_affected > 0)
    }
}
