//! Command dispatcher.
//!
//! Interprets inbound ASDUs against the register table and produces the
//! ASDUs to send back, in order. It performs no I/O of its own; the
//! connection decides whether data transfer currently allows sending them.

use std::sync::Arc;

use crate::error::Iec104Error;
use crate::registers::{Address, Register, RegisterStore};
use crate::types::{
    object_size, Asdu, Cot, Element, InformationObject, Ioa, PointValue, TypeId, APCI_SIZE,
    ASDU_HEADER_SIZE, MAX_OBJECTS,
};

/// Qualifier of interrogation for a station (global) interrogation.
pub const QOI_STATION: u8 = 20;

/// Broadcast common address accepted for interrogations.
pub const BROADCAST_COMMON_ADDRESS: u16 = 0xFFFF;

/// Fixed I-frame plus ASDU header overhead.
pub const FRAME_OVERHEAD: usize = APCI_SIZE + ASDU_HEADER_SIZE;

/// Turns activation ASDUs into confirm/report/terminate sequences.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RegisterStore>,
    common_address: u16,
    max_frame_size: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("common_address", &self.common_address)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RegisterStore>, common_address: u16, max_frame_size: usize) -> Self {
        Self {
            store,
            common_address,
            max_frame_size,
        }
    }

    /// Handle one inbound ASDU and return the replies in sending order.
    ///
    /// Anything that is not a supported activation yields no reply.
    pub fn handle(&self, asdu: &Asdu) -> Vec<Asdu> {
        let type_id = asdu.type_id();
        let coa = asdu.common_address();

        if asdu.cot() != Cot::Activation {
            tracing::debug!(%type_id, cot = %asdu.cot(), "ignoring ASDU with unsupported cause");
            return Vec::new();
        }

        match type_id {
            TypeId::SingleCommand
            | TypeId::DoubleCommand
            | TypeId::SetpointScaled
            | TypeId::SetpointFloat => {
                if coa != self.common_address {
                    tracing::debug!(%type_id, coa, "ignoring command for foreign common address");
                    return Vec::new();
                }
                asdu.objects
                    .iter()
                    .flat_map(|object| self.command(asdu, object))
                    .collect()
            }
            TypeId::InterrogationCommand => {
                if coa != self.common_address && coa != BROADCAST_COMMON_ADDRESS {
                    tracing::debug!(coa, "ignoring interrogation for foreign common address");
                    return Vec::new();
                }
                self.interrogation(asdu)
            }
            _ => {
                tracing::debug!(%type_id, "ignoring unsupported type");
                Vec::new()
            }
        }
    }

    fn reply(&self, request: &Asdu, object: &InformationObject, cot: Cot) -> Asdu {
        let mut reply = Asdu::single(request.type_id(), cot, self.common_address, *object);
        reply.header.originator = request.header.originator;
        reply
    }

    fn command(&self, request: &Asdu, object: &InformationObject) -> Vec<Asdu> {
        let type_id = request.type_id();
        let address = Address::from(object.ioa);

        let Some(register) = self.store.get_register(address) else {
            let err = Iec104Error::UnknownObjectAddress(object.ioa.value());
            tracing::info!(error = %err, %type_id, "command rejected");
            return vec![self.reply(request, object, Cot::UnknownIoa)];
        };

        if register.category != type_id {
            let err = Iec104Error::TypeMismatch {
                ioa: object.ioa.value(),
                expected: type_id.as_u8(),
                actual: register.category.as_u8(),
            };
            tracing::info!(error = %err, "command rejected");
            return vec![self.reply(request, object, Cot::ActivationConfirm).negative()];
        }

        let Some(value) = object.element.command_value() else {
            tracing::warn!(ioa = object.ioa.value(), %type_id, "element carries no command value");
            return Vec::new();
        };

        let mut replies = vec![self.reply(request, object, Cot::ActivationConfirm)];

        if let Err(e) = self.store.set_register(address, value) {
            tracing::warn!(error = %e, ioa = object.ioa.value(), "failed to write register");
        } else {
            tracing::info!(ioa = object.ioa.value(), %type_id, %value, "command executed");
        }

        if let Some(related) = register.relation {
            if let Some(report) = self.relation_report(related, value) {
                replies.push(report);
            }
        }

        replies.push(self.reply(request, object, Cot::ActivationTermination));
        replies
    }

    /// Mirror a command value into the related register and report it.
    fn relation_report(&self, address: Address, value: PointValue) -> Option<Asdu> {
        if let Err(e) = self.store.set_register(address, value) {
            tracing::warn!(error = %e, address = %address, "failed to write related register");
            return None;
        }
        let related = self.store.get_register(address)?;
        match related.element() {
            Ok(element) => Some(Asdu::single(
                related.category,
                Cot::ReturnRemoteCommand,
                self.common_address,
                InformationObject::new(Ioa::from(address), element),
            )),
            Err(e) => {
                tracing::warn!(error = %e, address = %address, "cannot encode related register");
                None
            }
        }
    }

    fn interrogation(&self, request: &Asdu) -> Vec<Asdu> {
        let Some(object) = request.objects.first() else {
            return Vec::new();
        };
        let qoi = match object.element {
            Element::Interrogation { qoi } => qoi,
            _ => return Vec::new(),
        };
        if qoi != QOI_STATION {
            tracing::info!(qoi, "ignoring group interrogation");
            return Vec::new();
        }

        let mut replies = vec![self.reply(request, object, Cot::ActivationConfirm)];
        for category in TypeId::INTERROGATION_CATEGORIES {
            let registers = self.store.registers_of_category(category);
            replies.extend(self.pack(category, &registers));
        }
        replies.push(self.reply(request, object, Cot::ActivationTermination));

        tracing::info!(frames = replies.len(), "station interrogation answered");
        replies
    }

    /// Objects per interrogation reply that still fit under the frame size.
    fn batch_size(&self, category: TypeId) -> usize {
        let budget = self.max_frame_size.saturating_sub(FRAME_OVERHEAD);
        (budget / object_size(category)).clamp(1, MAX_OBJECTS)
    }

    fn pack(&self, category: TypeId, registers: &[Register]) -> Vec<Asdu> {
        let objects: Vec<InformationObject> = registers
            .iter()
            .filter_map(|register| match register.element() {
                Ok(element) => Some(InformationObject::new(Ioa::from(register.address), element)),
                Err(e) => {
                    tracing::warn!(error = %e, address = %register.address, "skipping register");
                    None
                }
            })
            .collect();

        objects
            .chunks(self.batch_size(category))
            .map(|batch| {
                Asdu::new(
                    category,
                    Cot::InterrogatedByStation,
                    self.common_address,
                    batch.to_vec(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::RegisterTable;
    use crate::types::{CommandQualifier, Quality};

    const COA: u16 = 7720;

    fn store() -> Arc<RegisterTable> {
        Arc::new(
            RegisterTable::from_registers([
                Register::new(Address::from_ioa(0x1401), TypeId::SingleCommand, PointValue::Bool(false)),
                Register::new(Address::from_ioa(0x1402), TypeId::SingleCommand, PointValue::Bool(false))
                    .with_relation(Address::from_ioa(0x0401)),
                Register::new(Address::from_ioa(0x0401), TypeId::SinglePoint, PointValue::Bool(false)),
                Register::new(Address::from_ioa(0x0402), TypeId::SinglePoint, PointValue::Bool(true)),
                Register::new(Address::from_ioa(0x2001), TypeId::SetpointFloat, PointValue::Float(0.0))
                    .with_relation(Address::from_ioa(0x0701)),
                Register::new(Address::from_ioa(0x0701), TypeId::MeasuredFloat, PointValue::Float(0.0)),
            ])
            .unwrap(),
        )
    }

    fn dispatcher(store: Arc<RegisterTable>) -> Dispatcher {
        Dispatcher::new(store, COA, 255)
    }

    fn single_command(ioa: u32, state: bool) -> Asdu {
        Asdu::single(
            TypeId::SingleCommand,
            Cot::Activation,
            COA,
            InformationObject::new(
                Ioa(ioa),
                Element::SingleCommand {
                    state,
                    qualifier: CommandQualifier::default(),
                },
            ),
        )
    }

    fn interrogation(coa: u16, qoi: u8) -> Asdu {
        Asdu::single(
            TypeId::InterrogationCommand,
            Cot::Activation,
            coa,
            InformationObject::new(Ioa(0), Element::Interrogation { qoi }),
        )
    }

    fn cots(replies: &[Asdu]) -> Vec<Cot> {
        replies.iter().map(|a| a.cot()).collect()
    }

    #[test]
    fn test_command_without_relation() {
        let store = store();
        let replies = dispatcher(store.clone()).handle(&single_command(0x1401, true));

        assert_eq!(
            cots(&replies),
            vec![Cot::ActivationConfirm, Cot::ActivationTermination]
        );
        assert!(replies.iter().all(|a| !a.header.negative));
        assert_eq!(
            store.get_register(Address::from_ioa(0x1401)).unwrap().value,
            PointValue::Bool(true)
        );
    }

    #[test]
    fn test_command_with_relation_reports_related() {
        let store = store();
        let replies = dispatcher(store.clone()).handle(&single_command(0x1402, true));

        assert_eq!(
            cots(&replies),
            vec![
                Cot::ActivationConfirm,
                Cot::ReturnRemoteCommand,
                Cot::ActivationTermination
            ]
        );
        let report = &replies[1];
        assert_eq!(report.type_id(), TypeId::SinglePoint);
        assert_eq!(report.objects[0].ioa, Ioa(0x0401));
        assert_eq!(
            report.objects[0].element,
            Element::SinglePoint {
                value: true,
                quality: Quality::GOOD
            }
        );
        assert_eq!(
            store.get_register(Address::from_ioa(0x0401)).unwrap().value,
            PointValue::Bool(true)
        );
    }

    #[test]
    fn test_float_setpoint_relation() {
        let store = store();
        let request = Asdu::single(
            TypeId::SetpointFloat,
            Cot::Activation,
            COA,
            InformationObject::new(Ioa(0x2001), Element::SetpointFloat { value: 42.5, qos: 0 }),
        );
        let replies = dispatcher(store.clone()).handle(&request);
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[1].type_id(), TypeId::MeasuredFloat);
        assert_eq!(
            store.get_register(Address::from_ioa(0x0701)).unwrap().value,
            PointValue::Float(42.5)
        );
    }

    #[test]
    fn test_unknown_address() {
        let replies = dispatcher(store()).handle(&single_command(0x9999, true));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].cot(), Cot::UnknownIoa);
        assert_eq!(replies[0].objects[0].ioa, Ioa(0x9999));
    }

    #[test]
    fn test_category_mismatch_is_negative_confirm() {
        let store = store();
        let request = Asdu::single(
            TypeId::DoubleCommand,
            Cot::Activation,
            COA,
            InformationObject::new(
                Ioa(0x1401),
                Element::DoubleCommand {
                    state: 2,
                    qualifier: CommandQualifier::default(),
                },
            ),
        );
        let replies = dispatcher(store.clone()).handle(&request);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].cot(), Cot::ActivationConfirm);
        assert!(replies[0].header.negative);
        assert_eq!(
            store.get_register(Address::from_ioa(0x1401)).unwrap().value,
            PointValue::Bool(false)
        );
    }

    #[test]
    fn test_wrong_cot_and_coa_ignored() {
        let d = dispatcher(store());

        let mut request = single_command(0x1401, true);
        request.header.cot = Cot::Deactivation;
        assert!(d.handle(&request).is_empty());

        let mut request = single_command(0x1401, true);
        request.header.common_address = 1;
        assert!(d.handle(&request).is_empty());

        // Commands do not accept the broadcast address
        let mut request = single_command(0x1401, true);
        request.header.common_address = BROADCAST_COMMON_ADDRESS;
        assert!(d.handle(&request).is_empty());
    }

    #[test]
    fn test_unsupported_type_ignored() {
        let request = Asdu::single(
            TypeId::ReadCommand,
            Cot::Request,
            COA,
            InformationObject::new(Ioa(0x0401), Element::Read),
        );
        assert!(dispatcher(store()).handle(&request).is_empty());

        let request = Asdu::single(
            TypeId::RegulatingStep,
            Cot::Activation,
            COA,
            InformationObject::new(
                Ioa(0x1401),
                Element::RegulatingStep {
                    state: 1,
                    qualifier: CommandQualifier::default(),
                },
            ),
        );
        assert!(dispatcher(store()).handle(&request).is_empty());
    }

    #[test]
    fn test_interrogation_sequence() {
        let replies = dispatcher(store()).handle(&interrogation(COA, QOI_STATION));

        assert_eq!(replies.first().unwrap().cot(), Cot::ActivationConfirm);
        assert_eq!(replies.last().unwrap().cot(), Cot::ActivationTermination);

        let data: Vec<&Asdu> = replies[1..replies.len() - 1].iter().collect();
        let types: Vec<TypeId> = data.iter().map(|a| a.type_id()).collect();
        assert_eq!(types, vec![TypeId::SinglePoint, TypeId::MeasuredFloat]);
        assert!(data.iter().all(|a| a.cot() == Cot::InterrogatedByStation));

        let ioas: Vec<Ioa> = data[0].objects.iter().map(|o| o.ioa).collect();
        assert_eq!(ioas, vec![Ioa(0x0401), Ioa(0x0402)]);
    }

    #[test]
    fn test_interrogation_broadcast_and_qoi() {
        let d = dispatcher(store());
        let replies = d.handle(&interrogation(BROADCAST_COMMON_ADDRESS, QOI_STATION));
        assert!(!replies.is_empty());
        assert!(replies.iter().all(|a| a.common_address() == COA));

        assert!(d.handle(&interrogation(COA, 21)).is_empty());
        assert!(d.handle(&interrogation(1, QOI_STATION)).is_empty());
    }

    #[test]
    fn test_interrogation_packs_under_frame_size() {
        let registers = (0..100u32).map(|i| {
            Register::new(Address::from_ioa(0x0100 + i), TypeId::MeasuredFloat, PointValue::Float(i as f64))
        });
        let store = Arc::new(RegisterTable::from_registers(registers).unwrap());

        // 12 + 8 * 30 = 252 fits, 31 objects would not
        let replies = Dispatcher::new(store, COA, 255).handle(&interrogation(COA, QOI_STATION));
        let counts: Vec<usize> = replies[1..replies.len() - 1]
            .iter()
            .map(|a| a.objects.len())
            .collect();
        assert_eq!(counts, vec![30, 30, 30, 10]);

        for asdu in &replies {
            assert!(APCI_SIZE + asdu.encoded_len() <= 255);
        }

        let ioas: Vec<u32> = replies[1..replies.len() - 1]
            .iter()
            .flat_map(|a| a.objects.iter().map(|o| o.ioa.value()))
            .collect();
        let mut sorted = ioas.clone();
        sorted.sort_unstable();
        assert_eq!(ioas, sorted);
        assert_eq!(ioas.len(), 100);
    }

    #[test]
    fn test_small_frame_size_still_makes_progress() {
        let replies = Dispatcher::new(store(), COA, 20).handle(&interrogation(COA, QOI_STATION));
        // Both single points share a frame, the float needs its own
        let counts: Vec<usize> = replies.iter().map(|a| a.objects.len()).collect();
        assert_eq!(counts, vec![1, 2, 1, 1]);
    }
}
