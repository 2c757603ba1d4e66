table! {
    document_acl (uuid, user_id, permission) {
        uuid -> Uuid,
        user_id -> Varchar,
        permission -> crate::db::types::Permission_type,
    }
}

table! {
    document_controls (uuid) {
        uuid -> Uuid,
        licenseid -> Nullable<Int4>,
    }
}

table! {
    files (id) {
        id -> Int4,
        media_type -> Varchar,
        path -> Varchar,
        hash -> Bytea,
    }
}

table! {
    license_acceptances (uuid, user_id) {
        uuid -> Uuid,
        user_id -> Varchar,
        accepted -> Nullable<Bool>,
    }
}

table! {
    licenses (id) {
        id -> Int4,
        code -> Varchar,
        name -> Varchar,
        url -> Varchar,
        is_valid_for_publication -> Bool,
    }
}

table! {
    module_files (id) {
        id -> Int4,
        module_ident -> Int4,
        file -> Int4,
        filename -> Varchar,
    }
}

table! {
    module_keywords (module_ident, keyword) {
        module_ident -> Int4,
        keyword -> Varchar,
    }
}

table! {
    modules (module_ident) {
        module_ident -> Int4,
        uuid -> Uuid,
        major_version -> Int4,
        minor_version -> Nullable<Int4>,
        #[sql_name = "type"]
        type_ -> crate::db::types::Content_type,
        title -> Varchar,
        language -> Varchar,
        metadata -> Jsonb,
        publisher -> Varchar,
        publication_message -> Nullable<Varchar>,
        created -> Timestamptz,
        revised -> Timestamptz,
        state -> crate::db::types::Module_state,
        recipe -> Nullable<Varchar>,
        baked -> Nullable<Timestamptz>,
    }
}

table! {
    pending_documents (id) {
        id -> Int4,
        publication_id -> Int4,
        uuid -> Uuid,
        major_version -> Int4,
        minor_version -> Nullable<Int4>,
        #[sql_name = "type"]
        type_ -> crate::db::types::Content_type,
        license_accepted -> Bool,
        roles_accepted -> Bool,
        metadata -> Jsonb,
        content -> Nullable<Bytea>,
    }
}

table! {
    pending_resource_associations (document_id, resource_id) {
        document_id -> Int4,
        resource_id -> Int4,
    }
}

table! {
    pending_resources (id) {
        id -> Int4,
        data -> Bytea,
        hash -> Bytea,
        media_type -> Varchar,
        filename -> Varchar,
    }
}

table! {
    post_publication_results (id) {
        id -> Int4,
        module_ident -> Int4,
        state -> crate::db::types::Publication_state,
        message -> Text,
        timestamp -> Timestamptz,
    }
}

table! {
    publications (id) {
        id -> Int4,
        publisher -> Varchar,
        publication_message -> Text,
        epub -> Nullable<Bytea>,
        state -> Nullable<crate::db::types::Publication_state>,
        state_messages -> Nullable<Jsonb>,
        is_pre_publication -> Bool,
        created -> Timestamptz,
    }
}

table! {
    role_acceptances (uuid, user_id, role_type) {
        uuid -> Uuid,
        user_id -> Varchar,
        role_type -> crate::db::types::Role_type,
        accepted -> Nullable<Bool>,
    }
}

table! {
    subjects (id) {
        id -> Int4,
        name -> Varchar,
    }
}

table! {
    trees (nodeid) {
        nodeid -> Int4,
        parent -> Nullable<Int4>,
        module -> Nullable<Int4>,
        title -> Nullable<Varchar>,
        child_order -> Int4,
        latest -> Bool,
        is_collated -> Bool,
    }
}

table! {
    users (username) {
        username -> Varchar,
        is_moderated -> Bool,
    }
}

joinable!(document_controls -> licenses (licenseid));
joinable!(module_files -> files (file));
joinable!(module_files -> modules (module_ident));
joinable!(module_keywords -> modules (module_ident));
joinable!(pending_documents -> publications (publication_id));
joinable!(pending_resource_associations -> pending_documents (document_id));
joinable!(pending_resource_associations -> pending_resources (resource_id));
joinable!(post_publication_results -> modules (module_ident));
joinable!(trees -> modules (module));

allow_tables_to_appear_in_same_query!(
    document_acl,
    document_controls,
    files,
    license_acceptances,
    licenses,
    module_files,
    module_keywords,
    modules,
    pending_documents,
    pending_resource_associations,
    pending_resources,
    post_publication_results,
    publications,
    role_acceptances,
    subjects,
    trees,
    users,
);
