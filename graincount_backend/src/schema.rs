table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        email -> Nullable<Varchar>,
        joined -> Timestamptz,
        last_seen -> Timestamptz,
        is_active -> Bool,
        is_staff -> Bool,
        is_superuser -> Bool,
    }
}

table! {
    passwords (id) {
        id -> Int4,
        password_hash -> Bytea,
        salt -> Bytea,
        initial_rounds -> Int2,
        extra_rounds -> Int2,
    }
}

table! {
    sessions (id) {
        id -> Int4,
        user_id -> Int4,
        access_hash -> Bytea,
        refresh_hash -> Bytea,
        access_expires -> Timestamptz,
        refresh_expires -> Timestamptz,
        started -> Timestamptz,
        last_seen -> Timestamptz,
    }
}

table! {
    projects (id) {
        id -> Int4,
        project_name -> Varchar,
        creator_id -> Int4,
        create_date -> Timestamptz,
        project_description -> Varchar,
        priority -> Int4,
        closed -> Bool,
    }
}

table! {
    samples (id) {
        id -> Int4,
        sample_name -> Varchar,
        project_id -> Int4,
        sample_property -> Varchar,
        total_grains -> Int4,
        priority -> Int4,
        min_contributor_num -> Int4,
        completed -> Bool,
        public -> Bool,
    }
}

table! {
    transforms (id) {
        id -> Int4,
        x0 -> Float8,
        y0 -> Float8,
        t0 -> Float8,
        x1 -> Float8,
        y1 -> Float8,
        t1 -> Float8,
    }
}

table! {
    grains (id) {
        id -> Int4,
        sample_id -> Int4,
        index -> Int4,
        image_width -> Int4,
        image_height -> Int4,
        scale_x -> Nullable<Float8>,
        scale_y -> Nullable<Float8>,
        stage_x -> Nullable<Float8>,
        stage_y -> Nullable<Float8>,
        mica_stage_x -> Nullable<Float8>,
        mica_stage_y -> Nullable<Float8>,
        shift_x -> Int4,
        shift_y -> Int4,
        transform_id -> Nullable<Int4>,
    }
}

table! {
    regions (id) {
        id -> Int4,
        grain_id -> Int4,
        result_id -> Nullable<Int4>,
    }
}

table! {
    vertices (id) {
        id -> Int4,
        region_id -> Int4,
        x -> Int4,
        y -> Int4,
    }
}

table! {
    images (id) {
        id -> Int4,
        grain_id -> Int4,
        format -> Varchar,
        ft_type -> Varchar,
        index -> Int4,
        data -> Bytea,
        light_path -> Nullable<Varchar>,
        focus -> Nullable<Float8>,
    }
}

table! {
    grain_point_categories (name) {
        name -> Varchar,
        description -> Varchar,
    }
}

table! {
    track_counts (id) {
        id -> Int4,
        grain_id -> Int4,
        ft_type -> Varchar,
        worker_id -> Int4,
        result -> Int4,
        create_date -> Timestamptz,
    }
}

table! {
    grain_points (id) {
        id -> Int4,
        result_id -> Int4,
        x_pixels -> Int4,
        y_pixels -> Int4,
        category -> Varchar,
        comment -> Nullable<Varchar>,
    }
}

table! {
    tutorial_pages (id) {
        id -> Int4,
        result_id -> Int4,
        category -> Nullable<Varchar>,
        page_type -> Varchar,
        point_limit -> Nullable<Int4>,
        message -> Text,
        active -> Bool,
        sequence -> Int4,
    }
}

table! {
    tutorial_results (id) {
        id -> Int4,
        user_id -> Nullable<Int4>,
        session_id -> Nullable<Int4>,
        completed -> Timestamptz,
    }
}

joinable!(passwords -> users (id));
joinable!(sessions -> users (user_id));
joinable!(projects -> users (creator_id));
joinable!(samples -> projects (project_id));
joinable!(grains -> samples (sample_id));
joinable!(grains -> transforms (transform_id));
joinable!(regions -> grains (grain_id));
joinable!(regions -> track_counts (result_id));
joinable!(vertices -> regions (region_id));
joinable!(images -> grains (grain_id));
joinable!(track_counts -> grains (grain_id));
joinable!(track_counts -> users (worker_id));
joinable!(grain_points -> track_counts (result_id));
joinable!(grain_points -> grain_point_categories (category));
joinable!(tutorial_pages -> track_counts (result_id));
joinable!(tutorial_results -> users (user_id));
joinable!(tutorial_results -> sessions (session_id));

allow_tables_to_appear_in_same_query!(
    users,
    passwords,
    sessions,
    projects,
    samples,
    transforms,
    grains,
    regions,
    vertices,
    images,
    grain_point_categories,
    track_counts,
    grain_points,
    tutorial_pages,
    tutorial_results,
);
