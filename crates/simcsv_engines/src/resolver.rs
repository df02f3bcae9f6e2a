#![forbid(unsafe_code)]

use simcsv_kernel_contracts::card::{AppContext, CardCommands, RecordNumber, StorageObject};
use tracing::debug;

use crate::error::{ContextError, FieldError};
use crate::registry::{FieldRegistry, Namespace};
use crate::validator::{record_target, FieldViolation};

/// Where a field lives on the card, plus the single record it targets, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTarget {
    pub object: StorageObject,
    pub record: Option<RecordNumber>,
}

/// Maps a field name onto its storage object.
///
/// The identifier comes from the base namespace when the name has one, then
/// USIM, then ISIM. The application to select is USIM for any USIM name, else
/// ISIM for any ISIM name, so a base path such as `3F007F206F46` is still
/// addressed with USIM selected.
pub fn resolve(registry: &FieldRegistry, name: &str) -> Result<FieldTarget, FieldError> {
    let (entry, record) = record_target(registry, name).map_err(|v| match v {
        FieldViolation::UnknownName { name } => FieldError::UnknownField { field: name },
        other => FieldError::InputContract {
            field: name.to_string(),
            reason: other.to_string(),
        },
    })?;

    let requires_context = if entry.in_namespace(Namespace::Usim) {
        Some(AppContext::Usim)
    } else if entry.in_namespace(Namespace::Isim) {
        Some(AppContext::Isim)
    } else {
        None
    };
    let (namespace, identifier) = [Namespace::Base, Namespace::Usim, Namespace::Isim]
        .into_iter()
        .find_map(|ns| entry.object_id(ns).map(|id| (ns, id.clone())))
        .ok_or_else(|| FieldError::UnknownField {
            field: name.to_string(),
        })?;

    debug!(
        field = name,
        namespace = namespace.as_str(),
        object = %identifier,
        "field resolved"
    );
    Ok(FieldTarget {
        object: StorageObject {
            identifier,
            requires_context,
            is_record_structured: entry.is_record_structured,
        },
        record,
    })
}

/// Selects the object's application (when it needs one) and checks the object
/// is addressable there.
pub fn enter_context<C: CardCommands + ?Sized>(
    card: &mut C,
    name: &str,
    object: &StorageObject,
) -> Result<(), FieldError> {
    let Some(context) = object.requires_context else {
        return Ok(());
    };
    let fail = |source: ContextError| FieldError::Context {
        field: name.to_string(),
        source,
    };

    if !card.capabilities().supports(context) {
        return Err(fail(ContextError::Unsupported { context }));
    }
    let status = card
        .select_context(context)
        .map_err(|source| fail(ContextError::SelectFailed { context, source }))?;
    if !status.is_ok() {
        return Err(fail(ContextError::SelectStatus { context, status }));
    }
    if !card.object_exists(&object.identifier) {
        return Err(fail(ContextError::ObjectAbsent {
            context,
            object: object.identifier.clone(),
        }));
    }
    debug!(field = name, context = %context, "context entered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_card::FakeCard;
    use simcsv_kernel_contracts::card::{CardCapabilities, StatusWord};

    #[test]
    fn at_resolver_01_base_path_wins_but_application_is_still_selected() {
        let r = FieldRegistry::standard();
        let spn = resolve(r, "SPN").unwrap();
        assert_eq!(spn.object.identifier.as_str(), "3F007F206F46");
        assert_eq!(spn.object.requires_context, Some(AppContext::Usim));

        let ust = resolve(r, "UST").unwrap();
        assert_eq!(ust.object.identifier.as_str(), "6F38");
        assert_eq!(ust.object.requires_context, Some(AppContext::Usim));

        // USIM and ISIM only: USIM identifier and context.
        let arr = resolve(r, "ARR").unwrap();
        assert_eq!(arr.object.identifier.as_str(), "6F06");
        assert_eq!(arr.object.requires_context, Some(AppContext::Usim));

        let impu = resolve(r, "IMPU.2").unwrap();
        assert_eq!(impu.object.requires_context, Some(AppContext::Isim));
        assert!(impu.object.is_record_structured);
        assert_eq!(impu.record.map(|n| n.get()), Some(2));

        let iccid = resolve(r, "ICCID").unwrap();
        assert_eq!(iccid.object.identifier.as_str(), "3F002FE2");
        assert_eq!(iccid.object.requires_context, None);
    }

    #[test]
    fn at_resolver_02_unknown_and_bad_targets() {
        let r = FieldRegistry::standard();
        assert_eq!(
            resolve(r, "BOGUS"),
            Err(FieldError::UnknownField {
                field: "BOGUS".into()
            })
        );
        assert!(matches!(
            resolve(r, "SPN.1"),
            Err(FieldError::InputContract { .. })
        ));
    }

    #[test]
    fn at_resolver_03_missing_capability_is_distinct() {
        let mut card = FakeCard::new(CardCapabilities {
            supports_context_a: true,
            supports_context_b: false,
        });
        let target = resolve(FieldRegistry::standard(), "IMPU").unwrap();
        let err = enter_context(&mut card, "IMPU", &target.object).unwrap_err();
        assert!(matches!(
            err,
            FieldError::Context {
                source: ContextError::Unsupported {
                    context: AppContext::Isim
                },
                ..
            }
        ));
        assert!(card.selected.is_empty());
    }

    #[test]
    fn at_resolver_04_select_status_and_absent_object() {
        let target = resolve(FieldRegistry::standard(), "SPN").unwrap();

        let mut card = FakeCard::new(CardCapabilities::uicc_with_usim_and_isim());
        card.select_status = StatusWord(0x6a82);
        let err = enter_context(&mut card, "SPN", &target.object).unwrap_err();
        assert!(err.to_string().contains("6a82"));

        let mut card = FakeCard::new(CardCapabilities::uicc_with_usim_and_isim());
        let err = enter_context(&mut card, "SPN", &target.object).unwrap_err();
        assert!(matches!(
            err,
            FieldError::Context {
                source: ContextError::ObjectAbsent { .. },
                ..
            }
        ));

        card.put_flat("3F007F206F46", &[0u8; 4]);
        assert!(enter_context(&mut card, "SPN", &target.object).is_ok());
        assert_eq!(card.selected, vec![AppContext::Usim, AppContext::Usim]);
    }
}
