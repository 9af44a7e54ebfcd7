//! DTE XML rendering.
use super::{Address, Emitter, InvoiceCertificationRequest, LineItem, Phrase, Receiver};

use helpers::amount;
use quick_xml::se::{SeError, Serializer as QuickXmlSerializer};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

pub const DTE_NS: &str = "http://www.sat.gob.gt/dte/fel/0.2.0";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const DTE_VERSION: &str = "0.1";
pub const DOCUMENT_TYPE: &str = "FACT";
pub const VAT_AFFILIATION: &str = "GEN";
const EMISSION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Wrapper for serializing a certification request as a DTE.
pub struct DteXml<'a>(pub &'a InvoiceCertificationRequest);

/// XML serialization error.
#[derive(Debug, Error)]
pub enum DteXmlError {
    #[error("failed to serialize DTE to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

mod helpers {
    use serde::ser::{Serialize, Serializer};
    use std::fmt::{self, Display, Formatter};

    pub(super) struct FixedPrecision {
        value: f64,
        precision: usize,
    }

    impl FixedPrecision {
        pub(super) fn new(value: f64, precision: usize) -> Self {
            Self { value, precision }
        }
    }

    impl Display for FixedPrecision {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            // avoid "-0.0000"
            let value = if self.value == 0.0 { 0.0 } else { self.value };
            write!(f, "{:.*}", self.precision, value)
        }
    }

    impl Serialize for FixedPrecision {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_str(self)
        }
    }

    /// Quantities and amounts on the DTE carry 4 decimals.
    pub(super) fn amount(value: f64) -> FixedPrecision {
        FixedPrecision::new(value, 4)
    }
}

struct DatosGeneralesXml<'a>(&'a InvoiceCertificationRequest);

impl<'a> Serialize for DatosGeneralesXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let request = self.0;
        let mut st = s.serialize_struct("dte:DatosGenerales", 3)?;
        st.serialize_field("@Tipo", DOCUMENT_TYPE)?;
        st.serialize_field(
            "@FechaHoraEmision",
            &request.issued_at().format(EMISSION_FORMAT).to_string(),
        )?;
        st.serialize_field("@CodigoMoneda", request.currency().code())?;
        st.end()
    }
}

struct AddressXml<'a>(&'static str, &'a Address);

impl<'a> Serialize for AddressXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (tag, a) = (self.0, self.1);
        let mut st = s.serialize_struct(tag, 0)?;
        st.serialize_field("dte:Direccion", &a.street)?;
        st.serialize_field("dte:CodigoPostal", &a.postal_code)?;
        st.serialize_field("dte:Municipio", &a.municipality)?;
        st.serialize_field("dte:Departamento", &a.department)?;
        st.serialize_field("dte:Pais", a.country_alpha2())?;
        st.end()
    }
}

struct EmisorXml<'a>(&'a Emitter);

impl<'a> Serialize for EmisorXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let emitter = self.0;
        let mut st = s.serialize_struct("dte:Emisor", 0)?;
        st.serialize_field("@NITEmisor", emitter.nit().as_str())?;
        st.serialize_field("@NombreEmisor", emitter.name())?;
        st.serialize_field("@CodigoEstablecimiento", emitter.establishment_code())?;
        st.serialize_field("@NombreComercial", emitter.commercial_name())?;
        st.serialize_field("@AfiliacionIVA", VAT_AFFILIATION)?;
        st.serialize_field(
            "dte:DireccionEmisor",
            &AddressXml("dte:DireccionEmisor", emitter.address()),
        )?;
        st.end()
    }
}

struct ReceptorXml<'a>(&'a Receiver);

impl<'a> Serialize for ReceptorXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let receiver = self.0;
        let mut st = s.serialize_struct("dte:Receptor", 0)?;
        st.serialize_field("@NombreReceptor", receiver.name())?;
        st.serialize_field("@IDReceptor", receiver.nit().as_str())?;
        st.serialize_field(
            "dte:DireccionReceptor",
            &AddressXml("dte:DireccionReceptor", receiver.address()),
        )?;
        st.end()
    }
}

struct FrasesXml(Phrase);

impl Serialize for FrasesXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct FraseXml(Phrase);
        impl Serialize for FraseXml {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("dte:Frase", 2)?;
                st.serialize_field("@TipoFrase", &self.0.kind.to_string())?;
                st.serialize_field("@CodigoEscenario", &self.0.scenario.to_string())?;
                st.end()
            }
        }

        let mut st = s.serialize_struct("dte:Frases", 0)?;
        st.serialize_field("dte:Frase", &FraseXml(self.0))?;
        st.end()
    }
}

fn impuestos(item: &LineItem) -> impl Serialize + '_ {
    struct ImpuestoSer<'a>(&'a LineItem);
    impl<'a> Serialize for ImpuestoSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:Impuesto", 0)?;
            st.serialize_field("dte:NombreCorto", "IVA")?;
            st.serialize_field("dte:CodigoUnidadGravable", "1")?;
            st.serialize_field("dte:MontoGravable", &amount(self.0.taxable_amount()))?;
            st.serialize_field("dte:MontoImpuesto", &amount(self.0.vat_amount()))?;
            st.end()
        }
    }

    struct ImpuestosSer<'a>(&'a LineItem);
    impl<'a> Serialize for ImpuestosSer<'a> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:Impuestos", 0)?;
            st.serialize_field("dte:Impuesto", &ImpuestoSer(self.0))?;
            st.end()
        }
    }

    ImpuestosSer(item)
}

struct ItemXml<'a>(usize, &'a LineItem);

impl<'a> Serialize for ItemXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (line_number, li) = (self.0, self.1);
        let mut st = s.serialize_struct("dte:Item", 0)?;
        st.serialize_field("@NumeroLinea", &line_number.to_string())?;
        st.serialize_field("@BienOServicio", li.kind().code())?;
        st.serialize_field("dte:Cantidad", &amount(li.quantity()))?;
        st.serialize_field("dte:UnidadMedida", li.unit_of_measure())?;
        st.serialize_field("dte:Descripcion", li.description())?;
        st.serialize_field("dte:PrecioUnitario", &amount(li.unit_price()))?;
        st.serialize_field("dte:Precio", &amount(li.subtotal()))?;
        st.serialize_field("dte:Descuento", &amount(0.0))?;
        st.serialize_field("dte:Impuestos", &impuestos(li))?;
        st.serialize_field("dte:Total", &amount(li.subtotal()))?;
        st.end()
    }
}

struct ItemsXml<'a>(&'a [LineItem]);

impl<'a> Serialize for ItemsXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("dte:Items", 0)?;
        for (idx, li) in self.0.iter().enumerate() {
            st.serialize_field("dte:Item", &ItemXml(idx + 1, li))?;
        }
        st.end()
    }
}

fn totales(vat_total: f64, grand_total: f64) -> impl Serialize {
    struct TotalImpuestoSer(f64);
    impl Serialize for TotalImpuestoSer {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("dte:TotalImpuesto", 2)?;
            st.serialize_field("@NombreCorto", "IVA")?;
            st.serialize_field("@TotalMontoImpuesto", &amount(self.0))?;
            st.end()
        }
    }

    struct TotalesSer {
        vat_total: f64,
        grand_total: f64,
    }
    impl Serialize for TotalesSer {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            struct TotalImpuestosSer(f64);
            impl Serialize for TotalImpuestosSer {
                fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
                where
                    S: Serializer,
                {
                    let mut st = s.serialize_struct("dte:TotalImpuestos", 0)?;
                    st.serialize_field("dte:TotalImpuesto", &TotalImpuestoSer(self.0))?;
                    st.end()
                }
            }

            let mut st = s.serialize_struct("dte:Totales", 0)?;
            st.serialize_field("dte:TotalImpuestos", &TotalImpuestosSer(self.vat_total))?;
            st.serialize_field("dte:GranTotal", &amount(self.grand_total))?;
            st.end()
        }
    }

    TotalesSer {
        vat_total,
        grand_total,
    }
}

struct DatosEmisionXml<'a>(&'a InvoiceCertificationRequest);

impl<'a> Serialize for DatosEmisionXml<'a> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let request = self.0;
        let mut st = s.serialize_struct("dte:DatosEmision", 0)?;
        st.serialize_field("@ID", "DatosEmision")?;
        st.serialize_field("dte:DatosGenerales", &DatosGeneralesXml(request))?;
        st.serialize_field("dte:Emisor", &EmisorXml(request.emitter()))?;
        st.serialize_field("dte:Receptor", &ReceptorXml(request.receiver()))?;
        st.serialize_field("dte:Frases", &FrasesXml(request.phrase()))?;
        st.serialize_field("dte:Items", &ItemsXml(request.line_items()))?;
        st.serialize_field(
            "dte:Totales",
            &totales(request.vat_total(), request.grand_total()),
        )?;
        st.end()
    }
}

impl<'a> Serialize for DteXml<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        struct DteSer<'a>(&'a InvoiceCertificationRequest);
        impl<'a> Serialize for DteSer<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("dte:DTE", 0)?;
                st.serialize_field("@ID", "DatosCertificados")?;
                st.serialize_field("dte:DatosEmision", &DatosEmisionXml(self.0))?;
                st.end()
            }
        }

        struct SatSer<'a>(&'a InvoiceCertificationRequest);
        impl<'a> Serialize for SatSer<'a> {
            fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                let mut st = s.serialize_struct("dte:SAT", 0)?;
                st.serialize_field("@ClaseDocumento", "dte")?;
                st.serialize_field("dte:DTE", &DteSer(self.0))?;
                st.end()
            }
        }

        let mut root = serializer.serialize_struct("dte:GTDocumento", 0)?;
        root.serialize_field("@xmlns:xsi", XSI_NS)?;
        root.serialize_field("@xmlns:dte", DTE_NS)?;
        root.serialize_field("@Version", DTE_VERSION)?;
        root.serialize_field("dte:SAT", &SatSer(self.0))?;
        root.end()
    }
}

/// Serialize a value to DTE XML.
///
/// # Examples
/// ```rust,no_run
/// use fel_core::invoice::xml::ToXml;
/// use fel_core::InvoiceCertificationRequest;
///
/// let request: InvoiceCertificationRequest = unimplemented!();
/// let xml = request.to_xml()?;
/// # let _ = xml;
/// # Ok::<(), fel_core::invoice::xml::DteXmlError>(())
/// ```
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DteXmlError>;

    fn to_xml(&self) -> Result<String, DteXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }

    fn to_xml_pretty(&self) -> Result<String, DteXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }
}

impl ToXml for InvoiceCertificationRequest {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, DteXmlError> {
        let mut buffer = String::with_capacity(4096);
        buffer.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        buffer.push('\n');

        {
            let mut serializer = QuickXmlSerializer::new(&mut buffer);
            if let XmlFormat::Pretty {
                indent_char,
                indent_size,
            } = format
            {
                serializer.indent(indent_char, indent_size);
            }
            DteXml(self).serialize(serializer)?;
        }

        Ok(buffer)
    }
}

/// Render the DTE submitted to the certifier (pretty-printed, 2-space indent).
///
/// # Errors
/// Returns [`DteXmlError`] when serialization fails.
pub fn render(request: &InvoiceCertificationRequest) -> Result<String, DteXmlError> {
    request.to_xml_pretty()
}
