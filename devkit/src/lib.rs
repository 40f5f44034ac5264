/*!
# GisMirror DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests du moteur de réconciliation avec:
- Un FeatureService simulé qui enregistre chaque appel et rejoue des échecs scriptés
- Un store qui enregistre chaque écriture
- Des builders de payloads host / event conformes au flux
- Un harness assemblant le tout autour d'un `Reconciler`
*/

pub mod feature_stub;
pub mod payloads;
pub mod recording_store;
pub mod test_utils;

pub use feature_stub::{FeatureCall, MockFeatureService, Op};
pub use payloads::{EventPayloadBuilder, HostPayloadBuilder};
pub use recording_store::{RecordingStore, StoreWrite};
pub use test_utils::TestHarness;
