// handlers/elevated/mod.rs - admin role required (/api/admin/*)
//
// `require_admin` runs after the session middleware on every route here.
pub mod pipelines;
pub mod staff;
