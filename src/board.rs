use crate::config::NumberingScheme;
use crate::gpio::LogicalPin;

// BCM 0 and 1 belong to the HAT EEPROM
pub const BCM_GPIO_PINS: [LogicalPin; 26] = [
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// (bcm, physical)
const BCM_TO_PHYSICAL: [(LogicalPin, u8); 26] = [
    (2, 3),
    (3, 5),
    (4, 7),
    (17, 11),
    (27, 13),
    (22, 15),
    (10, 19),
    (9, 21),
    (11, 23),
    (5, 29),
    (6, 31),
    (13, 33),
    (19, 35),
    (26, 37),
    (14, 8),
    (15, 10),
    (18, 12),
    (23, 16),
    (24, 18),
    (25, 22),
    (8, 24),
    (7, 26),
    (12, 32),
    (16, 36),
    (20, 38),
    (21, 40),
];

pub fn is_board_pin(pin: LogicalPin) -> bool {
    BCM_GPIO_PINS.contains(&pin)
}

pub fn to_physical(pin: LogicalPin) -> Option<u8> {
    BCM_TO_PHYSICAL
        .iter()
        .find(|(bcm, _)| *bcm == pin)
        .map(|(_, physical)| *physical)
}

pub fn from_physical(physical: u8) -> Option<LogicalPin> {
    BCM_TO_PHYSICAL
        .iter()
        .find(|(_, p)| *p == physical)
        .map(|(bcm, _)| *bcm)
}

impl NumberingScheme {
    pub fn address(&self, pin: LogicalPin) -> Option<u8> {
        match self {
            NumberingScheme::Logical => is_board_pin(pin).then_some(pin),
            NumberingScheme::Board => to_physical(pin),
        }
    }
}
