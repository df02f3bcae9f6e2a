#![forbid(unsafe_code)]

//! Closed registry of programmable field names.
//!
//! A name may appear in more than one namespace: the base (MF / DF.GSM)
//! namespace, the USIM application (application-A) and the ISIM application
//! (application-B). The registry keeps one file identifier per namespace and
//! leaves the choice of context to the resolver.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use simcsv_kernel_contracts::card::ObjectId;
use simcsv_kernel_contracts::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Base,
    Usim,
    Isim,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Base => "base",
            Namespace::Usim => "usim",
            Namespace::Isim => "isim",
        }
    }
}

const BASE_OBJECTS: &[(&str, &str)] = &[
    ("ICCID", "3F002FE2"),
    ("ELP", "3F002F05"),
    ("IMSI", "3F007F206F07"),
    ("Kc", "3F007F206F20"),
    ("PLMNsel", "3F007F206F30"),
    ("HPPLMN", "3F007F206F31"),
    ("ACMmax", "3F007F206F37"),
    ("SST", "3F007F206F38"),
    ("ACM", "3F007F206F39"),
    ("GID1", "3F007F206F3E"),
    ("GID2", "3F007F206F3F"),
    ("PUCT", "3F007F206F41"),
    ("CBMI", "3F007F206F45"),
    ("SPN", "3F007F206F46"),
    ("CBMID", "3F007F206F48"),
    ("KcGPRS", "3F007F206F52"),
    ("LOCIGPRS", "3F007F206F53"),
    ("PLMNwAcT", "3F007F206F60"),
    ("OPLMNwAcT", "3F007F206F61"),
    ("HPLMNAcT", "3F007F206F62"),
    ("BCCH", "3F007F206F74"),
    ("ACC", "3F007F206F78"),
    ("FPLMN", "3F007F206F7B"),
    ("LOCI", "3F007F206F7E"),
    ("AD", "3F007F206FAD"),
    ("PHASE", "3F007F206FAE"),
    ("ECC", "3F007F206FB7"),
    ("PNN", "3F007F206FC5"),
    ("OPL", "3F007F206FC6"),
    ("SPDI", "3F007F206FCD"),
    ("ADN", "3F007F106F3A"),
    ("FDN", "3F007F106F3B"),
    ("SMS", "3F007F106F3C"),
    ("MSISDN", "3F007F106F40"),
    ("SMSP", "3F007F106F42"),
    ("SMSS", "3F007F106F43"),
    ("SMSR", "3F007F106F47"),
    ("SDN", "3F007F106F49"),
    ("EXT1", "3F007F106F4A"),
    ("EXT2", "3F007F106F4B"),
];

const USIM_OBJECTS: &[(&str, &str)] = &[
    ("LI", "6F05"),
    ("ARR", "6F06"),
    ("IMSI", "6F07"),
    ("Keys", "6F08"),
    ("KeysPS", "6F09"),
    ("DCK", "6F2C"),
    ("HPPLMN", "6F31"),
    ("CNL", "6F32"),
    ("ACMmax", "6F37"),
    ("UST", "6F38"),
    ("ACM", "6F39"),
    ("FDN", "6F3B"),
    ("SMS", "6F3C"),
    ("GID1", "6F3E"),
    ("GID2", "6F3F"),
    ("MSISDN", "6F40"),
    ("PUCT", "6F41"),
    ("SMSP", "6F42"),
    ("SMSS", "6F43"),
    ("CBMI", "6F45"),
    ("SPN", "6F46"),
    ("SMSR", "6F47"),
    ("CBMID", "6F48"),
    ("SDN", "6F49"),
    ("EXT2", "6F4B"),
    ("EXT3", "6F4C"),
    ("BDN", "6F4D"),
    ("EXT5", "6F4E"),
    ("CCP2", "6F4F"),
    ("CBMIR", "6F50"),
    ("EXT4", "6F55"),
    ("EST", "6F56"),
    ("ACL", "6F57"),
    ("CMI", "6F58"),
    ("START-HFN", "6F5B"),
    ("THRESHOLD", "6F5C"),
    ("PLMNwAcT", "6F60"),
    ("OPLMNwAcT", "6F61"),
    ("HPLMNwAcT", "6F62"),
    ("PSLOCI", "6F73"),
    ("ACC", "6F78"),
    ("FPLMN", "6F7B"),
    ("LOCI", "6F7E"),
    ("ICI", "6F80"),
    ("OCI", "6F81"),
    ("ICT", "6F82"),
    ("OCT", "6F83"),
    ("AD", "6FAD"),
    ("EMLPP", "6FB5"),
    ("AAeM", "6FB6"),
    ("ECC", "6FB7"),
    ("HIDDENKEY", "6FC3"),
    ("NETPAR", "6FC4"),
    ("PNN", "6FC5"),
    ("OPL", "6FC6"),
    ("MBDN", "6FC7"),
    ("EXT6", "6FC8"),
    ("MBI", "6FC9"),
    ("MWIS", "6FCA"),
    ("CFIS", "6FCB"),
    ("EXT7", "6FCC"),
    ("SPDI", "6FCD"),
    ("MMSN", "6FCE"),
    ("EXT8", "6FCF"),
    ("MMSICP", "6FD0"),
    ("MMSUP", "6FD1"),
    ("MMSUCP", "6FD2"),
    ("NIA", "6FD3"),
    ("VGCSCA", "6FD4"),
    ("VBSCA", "6FD5"),
    ("GBABP", "6FD6"),
    ("MSK", "6FD7"),
    ("MUK", "6FD8"),
    ("EHPLMN", "6FD9"),
    ("GBANL", "6FDA"),
    ("EHPLMNPI", "6FDB"),
    ("LRPLMNSI", "6FDC"),
    ("NAFKCA", "6FDD"),
    ("SPNI", "6FDE"),
    ("PNNI", "6FDF"),
    ("NCP-IP", "6FE2"),
    ("EPSLOCI", "6FE3"),
    ("EPSNSC", "6FE4"),
    ("UFC", "6FE6"),
    ("UICCIARI", "6FE7"),
    ("NASCONFIG", "6FE8"),
    ("PWS", "6FEC"),
];

const ISIM_OBJECTS: &[(&str, &str)] = &[
    ("IMPI", "6F02"),
    ("DOMAIN", "6F03"),
    ("IMPU", "6F04"),
    ("ARR", "6F06"),
    ("IST", "6F07"),
    ("PCSCF", "6F09"),
    ("SMS", "6F3C"),
    ("SMSP", "6F42"),
    ("SMSS", "6F43"),
    ("SMSR", "6F47"),
    ("AD", "6FAD"),
    ("GBABP", "6FD5"),
    ("GBANL", "6FD7"),
    ("NAFKCA", "6FDD"),
    ("UICCIARI", "6FE7"),
];

/// Fields programmed record by record instead of with a single binary update.
const RECORD_STRUCTURED: &[&str] = &["SMSP", "PCSCF", "IMPU"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub is_record_structured: bool,
    ids: BTreeMap<Namespace, ObjectId>,
}

impl RegistryEntry {
    pub fn in_namespace(&self, namespace: Namespace) -> bool {
        self.ids.contains_key(&namespace)
    }

    pub fn object_id(&self, namespace: Namespace) -> Option<&ObjectId> {
        self.ids.get(&namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.ids.keys().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRegistry {
    entries: BTreeMap<&'static str, RegistryEntry>,
}

impl FieldRegistry {
    /// The built-in registry, constructed once per process.
    pub fn standard() -> &'static FieldRegistry {
        static STANDARD: OnceLock<FieldRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            Self::from_tables(BASE_OBJECTS, USIM_OBJECTS, ISIM_OBJECTS, RECORD_STRUCTURED)
                .expect("built-in field registry tables must be well-formed")
        })
    }

    pub fn from_tables(
        base: &[(&'static str, &str)],
        usim: &[(&'static str, &str)],
        isim: &[(&'static str, &str)],
        record_structured: &[&str],
    ) -> Result<Self, ContractViolation> {
        let mut entries: BTreeMap<&'static str, RegistryEntry> = BTreeMap::new();
        for (namespace, table) in [
            (Namespace::Base, base),
            (Namespace::Usim, usim),
            (Namespace::Isim, isim),
        ] {
            for &(name, fid) in table {
                let id = ObjectId::new(fid)?;
                let entry = entries.entry(name).or_insert_with(|| RegistryEntry {
                    name,
                    is_record_structured: false,
                    ids: BTreeMap::new(),
                });
                if entry.ids.insert(namespace, id).is_some() {
                    return Err(ContractViolation::InvalidValue {
                        field: "field_registry.name",
                        reason: "must be unique within a namespace",
                    });
                }
            }
        }
        for name in record_structured {
            let Some(entry) = entries.get_mut(*name) else {
                return Err(ContractViolation::InvalidValue {
                    field: "field_registry.record_structured",
                    reason: "must name a registered field",
                });
            };
            entry.is_record_structured = true;
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    /// All known names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
