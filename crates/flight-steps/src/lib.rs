//! flight-steps: pasos reutilizables para flights de carga
//!
//! Verificación de permisos contra un colaborador externo, cálculo del
//! load tag, lock/unlock del tag y la composición `BulkLoadFlight` que los
//! encadena alrededor de los pasos propios de cada carga.

pub mod authz_step;
pub mod flights;
pub mod keys;
pub mod load_tag_step;
pub mod lock_step;
pub mod policy;
pub mod stubs;

pub use authz_step::VerifyAuthorizationStep;
pub use flights::{BulkLoadFlight, IngestFilesStep, BULK_LOAD_CLASS};
pub use load_tag_step::{resolve_load_tag, ComputeLoadTagStep};
pub use lock_step::{ConflictPolicy, LoadLockStep, LoadUnlockStep};
pub use policy::{IamAction, IamResourceType, PolicyDecisionPoint, PolicyError};
pub use stubs::StaticPolicyDecisionPoint;
