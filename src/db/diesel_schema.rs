// Kept in sync with the DDL in schema.rs.

diesel::table! {
    quests (id) {
        id -> Text,
        creator_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        status -> Text,
        gold_reward -> BigInt,
        commission_fee -> BigInt,
        assigned_to -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
        completed_at -> Nullable<Text>,
    }
}

diesel::table! {
    applications (id) {
        id -> Text,
        quest_id -> Text,
        applicant_id -> Text,
        status -> Text,
        message -> Nullable<Text>,
        reviewed_by -> Nullable<Text>,
        reviewed_at -> Nullable<Text>,
        kick_reason -> Nullable<Text>,
        applied_at -> Text,
    }
}

diesel::table! {
    application_attempts (id) {
        id -> Text,
        quest_id -> Text,
        applicant_id -> Text,
        attempt_number -> BigInt,
        application_id -> Text,
        attempted_at -> Text,
    }
}

diesel::table! {
    quest_participants (id) {
        id -> Text,
        quest_id -> Text,
        user_id -> Text,
        status -> Text,
        joined_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    transactions (id) {
        id -> Text,
        user_id -> Text,
        amount -> BigInt,
        transaction_type -> Text,
        quest_id -> Nullable<Text>,
        payment_proof_id -> Nullable<Text>,
        commission_fee -> BigInt,
        base_amount -> BigInt,
        description -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    user_balances (user_id) {
        user_id -> Text,
        gold_balance -> BigInt,
        last_updated -> Text,
    }
}

diesel::table! {
    payment_proofs (id) {
        id -> Text,
        user_id -> Text,
        payment_reference -> Text,
        package_gold -> BigInt,
        status -> Text,
        gold_awarded -> Integer,
        reviewed_by -> Nullable<Text>,
        reviewed_at -> Nullable<Text>,
        rejection_reason -> Nullable<Text>,
        submitted_at -> Text,
        awarded_at -> Nullable<Text>,
    }
}

diesel::joinable!(applications -> quests (quest_id));
diesel::joinable!(application_attempts -> quests (quest_id));
diesel::joinable!(quest_participants -> quests (quest_id));

diesel::allow_tables_to_appear_in_same_query!(
    quests,
    applications,
    application_attempts,
    quest_participants,
    transactions,
    user_balances,
    payment_proofs,
);
