// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status enums and lifecycle tables.
//!
//! Every enum here is stored as TEXT. The `text_enum!` macro wires up
//! `as_str()` / `parse()`, serde names and the sqlx encode/decode impls so
//! records can hold the typed value directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef};
use sqlx::{Decode, Encode, Postgres, Type};

use crate::error::StoreError;

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stored text form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }

            /// Parse the stored text form.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $text => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Type<Postgres> for $name {
            fn type_info() -> PgTypeInfo {
                <&str as Type<Postgres>>::type_info()
            }

            fn compatible(ty: &PgTypeInfo) -> bool {
                <&str as Type<Postgres>>::compatible(ty)
            }
        }

        impl<'r> Decode<'r, Postgres> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let text = <&str as Decode<Postgres>>::decode(value)?;
                $name::parse(text)
                    .ok_or_else(|| format!("unknown {} value: {}", stringify!($name), text).into())
            }
        }

        impl<'q> Encode<'q, Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
                <&str as Encode<'q, Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}

text_enum! {
    /// Instance lifecycle status.
    InstanceStatus {
        /// Accepted, not yet picked up by the site.
        Pending => "Pending",
        /// Site is provisioning the machine.
        Provisioning => "Provisioning",
        /// Interfaces or other config are being applied.
        Configuring => "Configuring",
        /// Running and reachable.
        Ready => "Ready",
        /// Software updates are being applied.
        Updating => "Updating",
        /// Site reported a failure.
        Error => "Error",
        /// Deletion in progress.
        Terminating => "Terminating",
        /// Released; terminal.
        Terminated => "Terminated",
        /// Site lost track of the instance.
        Unknown => "Unknown",
    }
}

text_enum! {
    /// Instance power state as last requested or reported.
    PowerStatus {
        /// Boot finished.
        BootCompleted => "BootCompleted",
        /// Reboot requested or in progress.
        Rebooting => "Rebooting",
        /// Power operation failed.
        Error => "Error",
    }
}

text_enum! {
    /// VPC lifecycle status.
    VpcStatus {
        /// Accepted.
        Pending => "Pending",
        /// Site is provisioning.
        Provisioning => "Provisioning",
        /// Usable.
        Ready => "Ready",
        /// Site reported a failure.
        Error => "Error",
        /// Deletion in progress.
        Deleting => "Deleting",
    }
}

text_enum! {
    /// Status shared by Ethernet, InfiniBand and NVLink interfaces.
    InterfaceStatus {
        /// Accepted.
        Pending => "Pending",
        /// Being configured on site.
        Provisioning => "Provisioning",
        /// Configured.
        Ready => "Ready",
        /// Configuration failed.
        Error => "Error",
        /// Being removed.
        Deleting => "Deleting",
    }
}

text_enum! {
    /// Status of a physical machine as reported by its site.
    MachineStatus {
        /// Discovered, still being brought up.
        Initializing => "Initializing",
        /// Healthy and available.
        Ready => "Ready",
        /// Backing an instance.
        InUse => "InUse",
        /// Under maintenance.
        Maintenance => "Maintenance",
        /// Unhealthy.
        Error => "Error",
        /// Removed from service; terminal.
        Decommissioned => "Decommissioned",
        /// State not reported.
        Unknown => "Unknown",
    }
}

text_enum! {
    /// Site registration status.
    SiteStatus {
        /// Created, agent not connected yet.
        Pending => "Pending",
        /// Agent registered; site can take work.
        Registered => "Registered",
        /// Site is unhealthy.
        Error => "Error",
    }
}

text_enum! {
    /// Status of referenced network resources (subnets, prefixes, partitions).
    ResourceStatus {
        /// Accepted.
        Pending => "Pending",
        /// Being provisioned.
        Provisioning => "Provisioning",
        /// Usable.
        Ready => "Ready",
        /// Failed.
        Error => "Error",
        /// Being removed.
        Deleting => "Deleting",
    }
}

text_enum! {
    /// DPU extension service deployment status.
    DeploymentStatus {
        /// Accepted.
        Pending => "Pending",
        /// Running on the DPU.
        Running => "Running",
        /// Failed.
        Error => "Error",
        /// Being removed.
        Terminating => "Terminating",
    }
}

text_enum! {
    /// VPC network virtualization flavour.
    NetworkVirtualizationType {
        /// Ethernet virtualizer, subnet based.
        EthernetVirtualizer => "ETHERNET_VIRTUALIZER",
        /// Flat network fabric, VPC prefix based.
        Fnn => "FNN",
    }
}

text_enum! {
    /// Machine capability category.
    CapabilityType {
        /// Processor.
        Cpu => "CPU",
        /// Memory.
        Memory => "Memory",
        /// Accelerator.
        Gpu => "GPU",
        /// Disk.
        Storage => "Storage",
        /// Ethernet NIC.
        Network => "Network",
        /// InfiniBand HCA.
        InfiniBand => "InfiniBand",
        /// Data processing unit.
        Dpu => "DPU",
    }
}

text_enum! {
    /// Device flavour attached to a capability.
    DeviceType {
        /// NIC exposed through a DPU.
        Dpu => "DPU",
        /// NVLink-connected GPU.
        NvLink => "NVLink",
        /// Not classified.
        Unknown => "Unknown",
    }
}

text_enum! {
    /// Resource an allocation constraint limits.
    ResourceType {
        /// Instances of one instance type.
        InstanceType => "InstanceType",
        /// Addresses from an IP block.
        IpBlock => "IPBlock",
    }
}

/// A status enum with a transition table.
pub trait Lifecycle: Copy + fmt::Display {
    /// Entity name used in errors.
    const ENTITY: &'static str;

    /// Whether moving from `self` to `next` is allowed.
    fn can_transition_to(self, next: Self) -> bool;

    /// Whether no further transitions are possible.
    fn is_terminal(self) -> bool;

    /// Stored text form.
    fn text(self) -> &'static str;
}

/// Validate a status change, returning the new status.
pub fn transition<S: Lifecycle>(from: S, to: S) -> Result<S, StoreError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(StoreError::InvalidTransition {
            entity: S::ENTITY,
            from: from.text(),
            to: to.text(),
        })
    }
}

impl Lifecycle for InstanceStatus {
    const ENTITY: &'static str = "instance";

    fn can_transition_to(self, next: Self) -> bool {
        use InstanceStatus::*;
        match self {
            Pending => matches!(
                next,
                Provisioning | Configuring | Ready | Error | Terminating
            ),
            Provisioning => matches!(next, Configuring | Ready | Error | Terminating),
            Configuring => matches!(next, Configuring | Ready | Error | Terminating),
            Ready => matches!(next, Configuring | Updating | Error | Terminating),
            Updating => matches!(next, Configuring | Ready | Error | Terminating),
            Error => matches!(next, Configuring | Ready | Terminating),
            Unknown => matches!(next, Configuring | Ready | Error | Terminating),
            Terminating => matches!(next, Terminating | Terminated | Error),
            Terminated => false,
        }
    }

    fn is_terminal(self) -> bool {
        self == InstanceStatus::Terminated
    }

    fn text(self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for VpcStatus {
    const ENTITY: &'static str = "vpc";

    fn can_transition_to(self, next: Self) -> bool {
        use VpcStatus::*;
        match self {
            Pending => matches!(next, Provisioning | Ready | Error | Deleting),
            Provisioning => matches!(next, Ready | Error | Deleting),
            Ready => matches!(next, Ready | Error | Deleting),
            Error => matches!(next, Ready | Deleting),
            Deleting => matches!(next, Deleting | Error),
        }
    }

    fn is_terminal(self) -> bool {
        false
    }

    fn text(self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for InterfaceStatus {
    const ENTITY: &'static str = "interface";

    fn can_transition_to(self, next: Self) -> bool {
        use InterfaceStatus::*;
        match self {
            Pending => matches!(next, Provisioning | Ready | Error | Deleting),
            Provisioning => matches!(next, Ready | Error | Deleting),
            Ready => matches!(next, Error | Deleting),
            Error => matches!(next, Ready | Deleting),
            Deleting => next == Deleting,
        }
    }

    fn is_terminal(self) -> bool {
        false
    }

    fn text(self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for MachineStatus {
    const ENTITY: &'static str = "machine";

    fn can_transition_to(self, next: Self) -> bool {
        use MachineStatus::*;
        match self {
            Initializing => matches!(next, Ready | Error),
            Ready => matches!(next, InUse | Maintenance | Error | Decommissioned),
            InUse => matches!(next, Ready | Maintenance | Error),
            Maintenance => matches!(next, Ready | Error | Decommissioned),
            Error => matches!(next, Ready | Maintenance | Decommissioned),
            Unknown => matches!(next, Ready | Error | Maintenance),
            Decommissioned => false,
        }
    }

    fn is_terminal(self) -> bool {
        self == MachineStatus::Decommissioned
    }

    fn text(self) -> &'static str {
        self.as_str()
    }
}

impl Lifecycle for DeploymentStatus {
    const ENTITY: &'static str = "dpu extension service deployment";

    fn can_transition_to(self, next: Self) -> bool {
        use DeploymentStatus::*;
        match self {
            Pending => matches!(next, Running | Error | Terminating),
            Running => matches!(next, Error | Terminating),
            Error => matches!(next, Running | Terminating),
            Terminating => next == Terminating,
        }
    }

    fn is_terminal(self) -> bool {
        false
    }

    fn text(self) -> &'static str {
        self.as_str()
    }
}
