use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashMap;

use tasker_queue::{TaskMessage, TaskState};

/// Strategy for arbitrary JSON payloads (bounded depth)
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for well-known and caller-defined task states
pub fn task_state_strategy() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Started),
        Just(TaskState::Success),
        Just(TaskState::Failure),
        Just(TaskState::Retry),
        "[a-z][a-z ]{0,15}".prop_map(TaskState::from),
    ]
}

/// Strategy for label maps
pub fn labels_strategy() -> impl Strategy<Value = HashMap<String, String>> {
    prop::collection::hash_map("[a-z_]{1,12}", "[a-zA-Z0-9.]{0,12}", 0..5)
}

/// Strategy for complete task messages
pub fn task_message_strategy() -> impl Strategy<Value = TaskMessage> {
    (
        "[a-f0-9]{32}",
        "[a-z_]{1,16}",
        labels_strategy(),
        prop::collection::vec(json_value_strategy(), 0..4),
        prop::collection::hash_map("[a-z_]{1,8}", json_value_strategy(), 0..3),
    )
        .prop_map(|(task_id, task_name, labels, args, kwargs)| TaskMessage {
            task_id,
            task_name,
            labels,
            args,
            kwargs: kwargs.into_iter().collect(),
        })
}
