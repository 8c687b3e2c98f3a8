use crate::backend::LocalForkId;
use alloy_primitives::{Address, map::AddressHashMap};
use itertools::Itertools;

/// Why a call into a forked environment ended without running any code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevertDiagnostic {
    /// The callee has code on other environments, but not on the active one.
    ContractExistsOnOtherForks {
        contract: Address,
        active: LocalForkId,
        available_on: Vec<LocalForkId>,
    },
    /// The callee has code nowhere.
    ContractDoesNotExist { contract: Address, active: LocalForkId, persistent: bool },
}

impl RevertDiagnostic {
    /// The account that was called.
    pub fn contract(&self) -> Address {
        match self {
            Self::ContractExistsOnOtherForks { contract, .. }
            | Self::ContractDoesNotExist { contract, .. } => *contract,
        }
    }

    /// The environment that was active when the call was made.
    pub fn active_fork(&self) -> LocalForkId {
        match self {
            Self::ContractExistsOnOtherForks { active, .. }
            | Self::ContractDoesNotExist { active, .. } => *active,
        }
    }

    /// Renders the diagnostic, naming the callee by its label when it has one.
    pub fn to_error_msg(&self, labels: &AddressHashMap<String>) -> String {
        let contract = self.contract();
        let name = labels.get(&contract).cloned().unwrap_or_else(|| contract.to_string());
        match self {
            Self::ContractExistsOnOtherForks { active, available_on, .. } => format!(
                "Contract {name} does not exist on active fork with id `{active}`\n        But exists on non active forks: `[{}]`",
                available_on.iter().format(", ")
            ),
            Self::ContractDoesNotExist { persistent: true, .. } => {
                format!("Contract {name} does not exist")
            }
            Self::ContractDoesNotExist { persistent: false, .. } => format!(
                "Contract {name} does not exist and is not marked as persistent, see `vm.makePersistent()`"
            ),
        }
    }
}
