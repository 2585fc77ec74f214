pub mod memory;
pub mod store;
pub mod supabase;
pub mod supabase_store;

pub use memory::InMemoryStore;
pub use store::{AppointmentFilter, ClinicStore, SlotFilter, StoreError, StoreTransaction};
pub use supabase::{PostgrestError, SupabaseClient};
pub use supabase_store::SupabaseStore;
