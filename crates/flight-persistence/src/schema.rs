// Esquema Diesel compartido por SQLite y Postgres.
// Tablas: flights, step_executions, load_locks
// Los timestamps se guardan como microsegundos desde epoch (`*_ts`).
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    flights (id) {
        id -> Text,
        class_ref -> Text,
        status -> Text,
        direction -> Text,
        input_params -> Text,
        working_state -> Text,
        error_detail -> Nullable<Text>,
        owner_subject -> Nullable<Text>,
        owner_email -> Nullable<Text>,
        submitted_at_ts -> BigInt,
        updated_at_ts -> BigInt,
        completed_at_ts -> Nullable<BigInt>,
    }
}
diesel::table! {
    step_executions (flight_id, seq) {
        flight_id -> Text,
        seq -> BigInt,
        step_index -> BigInt,
        direction -> Text,
        attempt -> Integer,
        outcome -> Text,
        error_detail -> Nullable<Text>,
        recorded_at_ts -> BigInt,
    }
}
diesel::table! {
    load_locks (load_tag) {
        load_tag -> Text,
        holder_flight_id -> Text,
        acquired_at_ts -> BigInt,
    }
}
diesel::joinable!(step_executions -> flights (flight_id));
allow_tables_to_appear_in_same_query!(flights, step_executions, load_locks);
