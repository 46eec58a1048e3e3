/// Setting this bit on a register address turns a read into a write.
pub const WRITE_FLAG: u8 = 0x80;

/// Address of the special command register.
pub const SPECIAL_COMMAND: u8 = 0xEA;

/// Number of consecutive conversion coefficient registers starting at [`Register::RmsIAC`].
pub const COEFFICIENT_COUNT: usize = 8;

/// Reference voltage conversion coefficient (RmsUC).
pub const UREF: u16 = 42563;
/// Reference current conversion coefficient (RmsIAC).
pub const IREF: u16 = 52241;
/// Reference active power conversion coefficient (PowerPAC).
pub const PREF: u16 = 44513;

/// Value of [`Register::SysCon`] after a reset.
pub const SYSCON_RESET_VALUE: u16 = 0x0A04;

/// Write enable (WREN) bit of [`Register::SysStatus`].
pub const SYSSTATUS_WREN: u8 = 0x10;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Reset = 0x96,
    CloseWrite = 0xDC,
    EnableWrite = 0xE5,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    SysCon = 0x00,
    EmuCon = 0x01,
    PowerPAOffset = 0x0A,
    PowerPBOffset = 0x0B,
    RmsIAOffset = 0x0E,
    RmsIBOffset = 0x0F,
    EmuCon2 = 0x13,
    Pulse1Sel = 0x1D,
    Angle = 0x22,
    UFreq = 0x23,
    RmsIA = 0x24,
    RmsIB = 0x25,
    RmsU = 0x26,
    PowerPA = 0x2C,
    PowerPB = 0x2D,
    SysStatus = 0x43,
    CoeffChecksum = 0x6F,
    RmsIAC = 0x70,
}

impl Register {
    pub const fn address(self) -> u8 {
        self as u8
    }

    /// Payload width of the register in bytes.
    pub const fn size(self) -> u8 {
        match self {
            Register::SysStatus => 1,
            Register::RmsIA | Register::RmsIB | Register::RmsU => 3,
            Register::PowerPA | Register::PowerPB => 4,
            _ => 2,
        }
    }
}

/// Index of a conversion coefficient, in the order the chip stores them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Coefficient {
    RmsIAC = 0,
    RmsIBC = 1,
    RmsUC = 2,
    PowerPAC = 3,
    PowerPBC = 4,
    PowerSC = 5,
    EnergyAC = 6,
    EnergyBC = 7,
}

impl Coefficient {
    /// Register address holding this coefficient.
    pub const fn address(self) -> u8 {
        Register::RmsIAC as u8 + self as u8
    }
}
