// Mirrors migrations/cache and migrations/meta.

diesel::table! {
    messages (primary_key) {
        primary_key -> Text,
        timestamp_ns -> BigInt,
        topic -> Text,
        payload -> Binary,
    }
}

diesel::table! {
    topic_ranges (id) {
        id -> Integer,
        ranges -> Text,
    }
}

diesel::table! {
    databases (name) {
        name -> Text,
        last_access -> Text,
        access_seq -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(messages, topic_ranges);
