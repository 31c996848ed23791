//! Open handshake: the ordered configuration commands sent before the
//! channel carries data.
//!
//! ```text
//! DIS_HEART ─► SET_BAUD_RATE ─► COMM_PARAM ─► SW_FLW_CTRL | SW_FLW_DIS
//!           ─► [HW_FLW_CTRL] ─► OPEN ─► RX_FLUSH ─► TX_FLUSH
//! ```
//!
//! Every command is fire-and-forget; replies are handled by the reader.

use crate::command::Control;
use crate::config::{FlowControl, SerialConfig};
use crate::error::IsockError;
use crate::flags::{ModemControl, ModemStatus};

/// Commands that configure and open the UART, in wire order.
pub fn configuration_sequence(serial: &SerialConfig) -> Result<Vec<Control>, IsockError> {
    serial.validate()?;

    let mut steps = vec![
        Control::DisableHeartbeat,
        Control::SetBaudRate(serial.baud_rate),
        Control::CommParameters {
            parity: serial.parity,
            word_length: serial.word_length,
            stop_bits: serial.stop_bits,
        },
    ];

    steps.push(match serial.flow_control {
        FlowControl::Software { xon, xoff, strip } => {
            Control::SoftwareFlowControl { xon, xoff, strip }
        }
        _ => Control::SoftwareFlowDisable,
    });

    match serial.flow_control {
        FlowControl::RtsCts => steps.push(Control::HardwareFlowControl {
            status: ModemStatus::CTS,
            control: ModemControl::RTS,
        }),
        FlowControl::DtrDsr => steps.push(Control::HardwareFlowControl {
            status: ModemStatus::DSR,
            control: ModemControl::DTR,
        }),
        FlowControl::None | FlowControl::Software { .. } => {}
    }

    steps.push(Control::Open);
    Ok(steps)
}

/// Commands sent right after the UART opens, for a clean start.
pub fn post_open_sequence() -> [Control; 2] {
    [Control::RxFlush, Control::TxFlush]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaudRate, Parity};
    use crate::opcode::Opcode;

    fn opcodes(steps: &[Control]) -> Vec<Opcode> {
        steps.iter().map(Control::opcode).collect()
    }

    #[test]
    fn default_sequence() {
        let steps = configuration_sequence(&SerialConfig::default()).unwrap();
        assert_eq!(
            opcodes(&steps),
            vec![
                Opcode::DisableHeartbeat,
                Opcode::SetBaudRate,
                Opcode::CommParameters,
                Opcode::SwFlowDisable,
                Opcode::Open,
            ]
        );
        assert_eq!(steps[1], Control::SetBaudRate(BaudRate::B115200));
    }

    #[test]
    fn software_flow_replaces_disable() {
        let serial = SerialConfig {
            flow_control: FlowControl::software(),
            parity: Parity::Even,
            ..SerialConfig::default()
        };
        let steps = configuration_sequence(&serial).unwrap();
        assert_eq!(steps[3].opcode(), Opcode::SwFlowControl);
        assert!(!opcodes(&steps).contains(&Opcode::SwFlowDisable));
        assert!(!opcodes(&steps).contains(&Opcode::HwFlowControl));
    }

    #[test]
    fn rts_cts_masks() {
        let serial = SerialConfig {
            flow_control: FlowControl::RtsCts,
            ..SerialConfig::default()
        };
        let steps = configuration_sequence(&serial).unwrap();
        assert_eq!(steps[3].opcode(), Opcode::SwFlowDisable);
        assert_eq!(&steps[4].payload()[..], &[0x10, 0x02]);
        assert_eq!(steps[5], Control::Open);
    }

    #[test]
    fn dtr_dsr_masks() {
        let serial = SerialConfig {
            flow_control: FlowControl::DtrDsr,
            ..SerialConfig::default()
        };
        let steps = configuration_sequence(&serial).unwrap();
        assert_eq!(&steps[4].payload()[..], &[0x20, 0x01]);
    }

    #[test]
    fn invalid_software_flow_rejected() {
        let serial = SerialConfig {
            flow_control: FlowControl::Software {
                xon: 1,
                xoff: 1,
                strip: false,
            },
            ..SerialConfig::default()
        };
        assert!(configuration_sequence(&serial).is_err());
    }
}
