/// How one reviewed field is looked up in a grant's vector index.
#[derive(Debug, Clone, Copy)]
pub struct FieldStrategy {
    pub field: &'static str,
    pub topic: &'static str,
    /// One query per attempt, tried in order.
    pub queries: &'static [&'static str],
    /// Adds a table-only nearest neighbour ahead of the general search.
    pub table_bias: bool,
    pub max_attempts: usize,
    /// Size of the general mixed search.
    pub general_k: usize,
}

impl FieldStrategy {
    pub fn ref_name(&self) -> String {
        ref_name(self.field)
    }

    /// Attempts this field may use. Never more than it has queries.
    pub fn attempt_budget(&self) -> usize {
        self.max_attempts.min(self.queries.len())
    }

    pub fn query(&self, attempt: usize) -> Option<&'static str> {
        self.queries.get(attempt).copied()
    }
}

pub fn ref_name(field: &str) -> String {
    format!("{field}_ref")
}

pub const MINIMIS_FIELD: &str = "Minimis";

pub const CONTEXT_FIELDS: [&str; 2] = ["Nombre de la convocatoria", "Linea de la convocatoria"];

pub const REQUIRED_FIELDS: [&str; 20] = [
    "Organismo convocante",
    "Nombre de la convocatoria",
    "Linea de la convocatoria",
    "Fecha de inicio de la convocatoria",
    "Fecha de fin de la convocatoria",
    "Objetivos de la convocatoria",
    "Beneficiarios",
    "Anio",
    "Área de la convocatoria",
    "Presupuesto mínimo disponible",
    "Presupuesto máximo disponible",
    "Duración mínima",
    "Duración máxima",
    "Tipo de financiación",
    "Forma y plazo de cobro",
    "Minimis",
    "Región de aplicación",
    "Link ficha técnica",
    "Link convocatoria",
    "Link orden de bases",
];

/// Review fields that older drafts predate. Inserted empty when missing.
pub const LATE_FIELDS: [&str; 4] = [
    "Intensidad de la subvención",
    "Intensidad del préstamo",
    "Tipo de consorcio",
    "Costes elegibles",
];

const PLAIN_K: usize = 4;

const fn plain(
    field: &'static str,
    topic: &'static str,
    queries: &'static [&'static str],
    max_attempts: usize,
) -> FieldStrategy {
    FieldStrategy {
        field,
        topic,
        queries,
        table_bias: false,
        max_attempts,
        general_k: PLAIN_K,
    }
}

const fn table_biased(
    field: &'static str,
    topic: &'static str,
    queries: &'static [&'static str],
    general_k: usize,
) -> FieldStrategy {
    FieldStrategy {
        field,
        topic,
        queries,
        table_bias: true,
        max_attempts: 3,
        general_k,
    }
}

/// Review order. Later fields may lean on values settled earlier.
pub static FIELD_STRATEGIES: [FieldStrategy; 18] = [
    plain(
        "Organismo convocante",
        "Organismo o entidad responsable de emitir la convocatoria pública.",
        &[
            "¿Cual es el nombre del organismo o entidad que propone la convocatoria?",
            "¿Quién es el responsable de emitir esta convocatoria pública?",
        ],
        1,
    ),
    plain(
        "Fecha de inicio de la convocatoria",
        "Fecha en la que comienza el período para presentar solicitudes a la convocatoria.",
        &[
            "¿Cuándo comienza el plazo de solicitud de la convocatoria?",
            "¿A partir de qué fecha se pueden presentar solicitudes para esta convocatoria?",
        ],
        1,
    ),
    plain(
        "Fecha de fin de la convocatoria",
        "Fecha límite para presentar solicitudes a la convocatoria. Si se indica, esta puede estar abierta de forma permanente.",
        &[
            "¿Cuál es la fecha límite para la presentación de solicitudes?",
            "¿Hasta qué día se pueden presentar solicitudes para esta convocatoria?",
        ],
        1,
    ),
    plain(
        "Objetivos de la convocatoria",
        "Propósitos o metas que busca alcanzar la convocatoria.",
        &[
            "¿Cuáles son los objetivos y finalidades de la convocatoria?",
            "¿Qué pretende conseguir esta convocatoria? ¿Cuáles son sus principales metas?",
        ],
        1,
    ),
    plain(
        "Beneficiarios",
        "Personas, empresas o entidades que pueden recibir las ayudas o beneficios de la convocatoria.",
        &[
            "¿Quiénes pueden solicitar la ayuda? ¿Cuáles son los beneficiarios de la convocatoria?",
            "¿A qué personas, empresas o entidades está dirigida esta convocatoria?",
        ],
        1,
    ),
    plain(
        "Anio",
        "Año en el que se publica o aplica la convocatoria.",
        &[
            "¿En qué año se publica, abre o cuál es la vigencia de esta convocatoria?",
            "¿A qué año corresponde esta convocatoria?",
        ],
        1,
    ),
    plain(
        "Presupuesto mínimo disponible",
        "Cantidad mínima de fondos disponibles para ser otorgados en la convocatoria.",
        &[
            "¿Qué importe mínimo se requiere para participar en la convocatoria?",
            "¿Cuál es la cantidad mínima de fondos que se pueden solicitar en esta ayuda?",
        ],
        1,
    ),
    plain(
        "Presupuesto máximo disponible",
        "Cantidad máxima de fondos disponibles para ser otorgados en la convocatoria.",
        &[
            "¿Qué importe máximo se puede financiar en esta ayuda?",
            "¿Cuál es la cantidad máxima de fondos que se pueden otorgar en esta convocatoria?",
        ],
        1,
    ),
    plain(
        "Duración mínima",
        "Duración mínima de los proyectos o actividades financiadas por la convocatoria.",
        &[
            "¿Cuál es la duración mínima exigida para los proyectos?",
            "¿Qué duración mínima deben cumplir los proyectos financiados?",
        ],
        1,
    ),
    plain(
        "Duración máxima",
        "Duración máxima de los proyectos o actividades financiadas por la convocatoria. Si se indica, la duración maxima puede ser permanente.",
        &[
            "¿Cuál es la duración máxima permitida para los proyectos?",
            "¿Qué duración máxima pueden tener los proyectos subvencionados?",
        ],
        1,
    ),
    plain(
        "Tipo de financiación",
        "Modalidad o forma de la ayuda financiera (subvención, préstamo, etc.).",
        &[
            "¿Qué tipo de financiación ofrece esta convocatoria? ¿Es una subvención, un préstamo u otra modalidad?",
            "¿Se trata de una ayuda económica directa, un crédito, o un incentivo fiscal?",
            "¿Qué modalidad de financiación está prevista en esta convocatoria?",
            "¿Se especifica si la ayuda es reembolsable o no reembolsable?",
        ],
        3,
    ),
    plain(
        "Forma y plazo de cobro",
        "Cómo y cuándo se recibe el dinero otorgado en la convocatoria.",
        &[
            "¿Cómo y cuándo se realiza el cobro o desembolso de la ayuda? ¿Cuál es el calendario de pagos?",
            "¿En qué plazos y de qué forma se recibe el dinero de la convocatoria?",
            "¿Cuál es el procedimiento de pago establecido para las ayudas?",
            "¿Se anticipa el pago total, se realiza en varios tramos o depende de hitos?",
        ],
        3,
    ),
    plain(
        MINIMIS_FIELD,
        "Indicación de si la ayuda está sujeta a la normativa de ayudas mínimas ('de minimis') según legislación europea.",
        &[
            "¿La ayuda está sujeta al régimen de minimis según la normativa de la UE?",
            "¿Se menciona que la ayuda se acoge a la normativa europea de minimis?",
            "¿La ayuda requiere notificación previa a la Comisión Europea o está exenta?",
            "¿Se especifica el cumplimiento de los límites establecidos para ayudas de minimis?",
        ],
        2,
    ),
    plain(
        "Región de aplicación",
        "Área geográfica donde se aplica o limita la convocatoria.",
        &[
            "¿En qué regiones, comunidades autónomas o zonas geográficas aplica esta convocatoria? ¿Dónde es válida la ayuda?",
            "¿A qué territorios se dirige esta convocatoria?",
            "¿La ayuda está limitada a una región específica o es de ámbito nacional?",
            "¿Qué áreas geográficas cubre la ayuda ofrecida en esta convocatoria?",
        ],
        3,
    ),
    table_biased(
        "Intensidad de la subvención",
        "Porcentaje de la subvención respecto al coste total del proyecto. Si la línea es únicamente préstamo, indicar que no aplica.",
        &[
            "¿Cuál es el porcentaje máximo de ayuda a fondo perdido que ofrece la convocatoria? Detallar diferencias según tipo de empresa, región o categoría del proyecto.",
            "¿Qué intensidades de ayuda aplican dependiendo de si se trata de investigación industrial, desarrollo experimental o innovación?",
            "¿Cómo varía el porcentaje de subvención según el tamaño de la empresa (pequeña, mediana, grande) y la localización geográfica?",
            "¿Qué condiciones específicas afectan la intensidad de la subvención? ¿Hay incrementos por colaboración en consorcio o participación de pymes?",
        ],
        6,
    ),
    table_biased(
        "Intensidad del préstamo",
        "Porcentaje o proporción del préstamo respecto al coste total del proyecto. Si la línea es únicamente subvención, indicar que no aplica.",
        &[
            "¿Qué porcentaje del proyecto es financiado mediante préstamo reembolsable? Indicar variaciones por tipo de actividad y tamaño de empresa.",
            "¿Cómo se estructura el tramo reembolsable frente al tramo no reembolsable en la convocatoria?",
            "¿Qué condiciones específicas (plazos, tipos de interés, carencia) regulan el tramo de préstamo en esta ayuda?",
            "¿Existen diferencias en el préstamo otorgado según localización territorial, sector o tamaño de la empresa?",
        ],
        6,
    ),
    table_biased(
        "Tipo de consorcio",
        "Tipo de agrupación de entidades requerida o permitida para acceder a la convocatoria. Si la línea no admite consorcio, también se indica.",
        &[
            "¿Qué requisitos existen sobre la composición del consorcio en esta convocatoria? Número mínimo de socios, tipos de entidades, condiciones de colaboración, etc.",
            "¿Se exige participación en consorcio? ¿Qué características deben tener los consorcios?",
            "¿Cuántos participantes debe tener el consorcio y qué tipo de entidades deben formar parte?",
            "¿Qué condiciones específicas deben cumplir los consorcios en esta convocatoria?",
        ],
        5,
    ),
    table_biased(
        "Costes elegibles",
        "Gastos o partidas de coste que son admitidos para ser financiados en el proyecto.",
        &[
            "¿Qué tipos de gasto están considerados elegibles para esta convocatoria? ¿Hay limitaciones en los tipos de gasto financiables?",
            "¿Cuáles son los gastos que pueden ser financiados por la ayuda? ¿Incluye costes indirectos, equipamiento o subcontrataciones?",
            "¿Qué restricciones existen en relación con los gastos financiables? ¿Cuáles son los límites en cada categoría de gasto?",
            "¿Cuáles son las condiciones de elegibilidad de los costes para la ayuda? ¿Se aplican exclusiones para ciertos tipos de gasto?",
        ],
        6,
    ),
];

/// `<field>_ref` keys of the review list, in review order.
pub fn review_ref_names() -> Vec<String> {
    FIELD_STRATEGIES
        .iter()
        .map(FieldStrategy::ref_name)
        .collect()
}
