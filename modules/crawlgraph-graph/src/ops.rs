use serde::{Deserialize, Serialize};

use crawlgraph_common::{
    DataType, EntityId, EntityRecord, EntityStub, FlagUpdate, PostBundle, ResumeCursor,
};

use crate::reconcile::EdgeSet;

/// A single idempotent graph write.
///
/// Writes are values so a failed one can be serialized into the sync queue
/// and replayed later against the same store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "args", rename_all = "snake_case")]
pub enum WriteOp {
    /// Full profile; marks `_profile_complete`.
    UpsertProfile(EntityRecord),
    /// Lightweight entities seen as followers, followees, likers or commenters.
    UpsertEntities(Vec<EntityStub>),
    ReconcileEdges {
        entity_id: EntityId,
        followers: Option<EdgeSet>,
        followees: Option<EdgeSet>,
    },
    UpsertPost(Box<PostBundle>),
    SetImageAnalysis {
        post_id: EntityId,
        analysis: String,
    },
    SetPostAnalysis {
        post_id: EntityId,
        analysis: String,
    },
    SetAccountAnalysis {
        entity_id: EntityId,
        analysis: String,
    },
    SetCompletionFlags {
        handle: String,
        update: FlagUpdate,
    },
    SaveCursor {
        entity_id: EntityId,
        data_type: DataType,
        cursor: ResumeCursor,
    },
    ClearCursor {
        entity_id: EntityId,
        data_type: DataType,
    },
}

impl WriteOp {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::UpsertProfile(_) => "upsert_profile",
            WriteOp::UpsertEntities(_) => "upsert_entities",
            WriteOp::ReconcileEdges { .. } => "reconcile_edges",
            WriteOp::UpsertPost(_) => "upsert_post",
            WriteOp::SetImageAnalysis { .. } => "set_image_analysis",
            WriteOp::SetPostAnalysis { .. } => "set_post_analysis",
            WriteOp::SetAccountAnalysis { .. } => "set_account_analysis",
            WriteOp::SetCompletionFlags { .. } => "set_completion_flags",
            WriteOp::SaveCursor { .. } => "save_cursor",
            WriteOp::ClearCursor { .. } => "clear_cursor",
        }
    }

    /// The stored cursor this write replaces, if it is a cursor write.
    /// A later write with the same key makes an earlier one obsolete.
    pub fn cursor_key(&self) -> Option<(EntityId, DataType)> {
        match self {
            WriteOp::SaveCursor {
                entity_id,
                data_type,
                ..
            }
            | WriteOp::ClearCursor {
                entity_id,
                data_type,
            } => Some((*entity_id, *data_type)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlgraph_common::Stage;

    #[test]
    fn serializes_with_operation_and_args() {
        let op = WriteOp::SetCompletionFlags {
            handle: "ada".into(),
            update: FlagUpdate::stage(Stage::Followers, true),
        };
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["operation"], "set_completion_flags");
        assert_eq!(v["args"]["handle"], "ada");
        assert_eq!(v["args"]["update"]["followers"], true);
        assert!(v["args"]["update"].get("posts").is_none());
    }

    #[test]
    fn save_and_clear_share_a_cursor_key() {
        let save = WriteOp::SaveCursor {
            entity_id: 7,
            data_type: DataType::Followers,
            cursor: ResumeCursor::new("tok", 3),
        };
        let clear = WriteOp::ClearCursor {
            entity_id: 7,
            data_type: DataType::Followers,
        };
        assert_eq!(save.cursor_key(), Some((7, DataType::Followers)));
        assert_eq!(save.cursor_key(), clear.cursor_key());
        assert_ne!(
            save.cursor_key(),
            WriteOp::ClearCursor { entity_id: 7, data_type: DataType::Posts }.cursor_key()
        );
        assert_eq!(WriteOp::UpsertEntities(vec![]).cursor_key(), None);
    }
}
