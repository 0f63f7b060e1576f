//! Canonical SIRENE entities and their storage layout

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::query_builder::Separated;
use sqlx::Postgres;
use std::fmt;
use std::str::FromStr;

use crate::pipeline::types::ColumnMap;

/// Which stock file a job ingests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    LegalUnit,
    Establishment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LegalUnit => "legal_unit",
            EntityKind::Establishment => "establishment",
        }
    }

    /// Default job name when none is given
    pub fn default_job_name(&self) -> &'static str {
        match self {
            EntityKind::LegalUnit => "sirene-unite-legale",
            EntityKind::Establishment => "sirene-etablissement",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "legal_unit" | "unite_legale" => Ok(EntityKind::LegalUnit),
            "establishment" | "etablissement" => Ok(EntityKind::Establishment),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage-side description of an entity
pub trait SireneRecord: Send + Sync + 'static {
    const KIND: EntityKind;
    /// Qualified target table
    const TABLE: &'static str;
    /// Stored column used as the conflict target
    const KEY_COLUMN: &'static str;
    /// Stored columns in bind order, key first
    const COLUMNS: &'static [&'static str];
    /// Source columns in canonical (header-less) order
    const SOURCE_COLUMNS: &'static [&'static str];

    fn key(&self) -> &str;

    /// Bind one row's values in [`Self::COLUMNS`] order
    fn push_binds<'args>(&'args self, row: Separated<'_, 'args, Postgres, &'static str>);

    /// The source key column a layout is missing, if any
    fn missing_key_column(columns: &ColumnMap) -> Option<&'static str> {
        let key = Self::SOURCE_COLUMNS.first().copied()?;
        (!columns.contains(key)).then_some(key)
    }
}

/// Widest bind count of any entity, used to bound the chunk size
pub fn max_columns() -> usize {
    LegalUnit::COLUMNS.len().max(Establishment::COLUMNS.len())
}

// ============================================================================
// Unité légale
// ============================================================================

/// A legal unit (unité légale), keyed by SIREN
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegalUnit {
    pub(crate) siren: String,
    pub(crate) statut_diffusion: Option<String>,
    pub(crate) etat_administratif: Option<String>,
    pub(crate) date_creation: Option<NaiveDate>,
    pub(crate) denomination: Option<String>,
    pub(crate) denomination_usuelle1: Option<String>,
    pub(crate) denomination_usuelle2: Option<String>,
    pub(crate) denomination_usuelle3: Option<String>,
    pub(crate) nom: Option<String>,
    pub(crate) nom_usage: Option<String>,
    pub(crate) sigle: Option<String>,
    pub(crate) prenom1: Option<String>,
    pub(crate) prenom2: Option<String>,
    pub(crate) prenom3: Option<String>,
    pub(crate) prenom4: Option<String>,
    pub(crate) categorie_juridique: Option<String>,
    pub(crate) activite_principale: Option<String>,
    pub(crate) nomenclature_activite: Option<String>,
    pub(crate) tranche_effectifs: Option<String>,
    pub(crate) annee_effectifs: Option<i32>,
    pub(crate) categorie_entreprise: Option<String>,
    pub(crate) annee_categorie_entreprise: Option<i32>,
    pub(crate) nic_siege: Option<String>,
    pub(crate) ess: bool,
    pub(crate) societe_mission: bool,
    pub(crate) caractere_employeur: bool,
    pub(crate) date_dernier_traitement: Option<DateTime<Utc>>,
    pub(crate) date_debut: Option<NaiveDate>,
    pub(crate) raw: Option<serde_json::Value>,
}

impl SireneRecord for LegalUnit {
    const KIND: EntityKind = EntityKind::LegalUnit;
    const TABLE: &'static str = "sirene.unite_legale";
    const KEY_COLUMN: &'static str = "siren";
    const COLUMNS: &'static [&'static str] = &[
        "siren",
        "statut_diffusion",
        "etat_administratif",
        "date_creation",
        "denomination",
        "denomination_usuelle1",
        "denomination_usuelle2",
        "denomination_usuelle3",
        "nom",
        "nom_usage",
        "sigle",
        "prenom1",
        "prenom2",
        "prenom3",
        "prenom4",
        "categorie_juridique",
        "activite_principale",
        "nomenclature_activite",
        "tranche_effectifs",
        "annee_effectifs",
        "categorie_entreprise",
        "annee_categorie_entreprise",
        "nic_siege",
        "ess",
        "societe_mission",
        "caractere_employeur",
        "date_dernier_traitement",
        "date_debut",
        "raw",
    ];
    const SOURCE_COLUMNS: &'static [&'static str] = &[
        "siren",
        "statutDiffusionUniteLegale",
        "etatAdministratifUniteLegale",
        "dateCreationUniteLegale",
        "denominationUniteLegale",
        "denominationUsuelle1UniteLegale",
        "denominationUsuelle2UniteLegale",
        "denominationUsuelle3UniteLegale",
        "nomUniteLegale",
        "nomUsageUniteLegale",
        "sigleUniteLegale",
        "prenom1UniteLegale",
        "prenom2UniteLegale",
        "prenom3UniteLegale",
        "prenom4UniteLegale",
        "categorieJuridiqueUniteLegale",
        "activitePrincipaleUniteLegale",
        "nomenclatureActiviteUniteLegale",
        "trancheEffectifsUniteLegale",
        "anneeEffectifsUniteLegale",
        "categorieEntreprise",
        "anneeCategorieEntreprise",
        "nicSiegeUniteLegale",
        "economieSocialeSolidaireUniteLegale",
        "societeMissionUniteLegale",
        "caractereEmployeurUniteLegale",
        "dateDernierTraitementUniteLegale",
        "dateDebut",
    ];

    fn key(&self) -> &str {
        &self.siren
    }

    fn push_binds<'args>(&'args self, mut row: Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.siren)
            .push_bind(&self.statut_diffusion)
            .push_bind(&self.etat_administratif)
            .push_bind(self.date_creation)
            .push_bind(&self.denomination)
            .push_bind(&self.denomination_usuelle1)
            .push_bind(&self.denomination_usuelle2)
            .push_bind(&self.denomination_usuelle3)
            .push_bind(&self.nom)
            .push_bind(&self.nom_usage)
            .push_bind(&self.sigle)
            .push_bind(&self.prenom1)
            .push_bind(&self.prenom2)
            .push_bind(&self.prenom3)
            .push_bind(&self.prenom4)
            .push_bind(&self.categorie_juridique)
            .push_bind(&self.activite_principale)
            .push_bind(&self.nomenclature_activite)
            .push_bind(&self.tranche_effectifs)
            .push_bind(self.annee_effectifs)
            .push_bind(&self.categorie_entreprise)
            .push_bind(self.annee_categorie_entreprise)
            .push_bind(&self.nic_siege)
            .push_bind(self.ess)
            .push_bind(self.societe_mission)
            .push_bind(self.caractere_employeur)
            .push_bind(self.date_dernier_traitement)
            .push_bind(self.date_debut)
            .push_bind(&self.raw);
    }
}

// ============================================================================
// Établissement
// ============================================================================

/// An establishment (établissement), keyed by SIRET
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Establishment {
    pub(crate) siret: String,
    pub(crate) siren: String,
    pub(crate) nic: String,
    pub(crate) etablissement_siege: bool,
    pub(crate) etat_administratif: Option<String>,
    pub(crate) date_creation: Option<NaiveDate>,
    pub(crate) date_debut: Option<NaiveDate>,
    pub(crate) date_dernier_traitement: Option<DateTime<Utc>>,
    pub(crate) enseigne1: Option<String>,
    pub(crate) enseigne2: Option<String>,
    pub(crate) enseigne3: Option<String>,
    pub(crate) denomination_usuelle: Option<String>,
    pub(crate) complement_adresse: Option<String>,
    pub(crate) numero_voie: Option<String>,
    pub(crate) type_voie: Option<String>,
    pub(crate) libelle_voie: Option<String>,
    pub(crate) code_postal: Option<String>,
    pub(crate) libelle_commune: Option<String>,
    pub(crate) code_commune: Option<String>,
    pub(crate) code_cedex: Option<String>,
    pub(crate) libelle_cedex: Option<String>,
    pub(crate) pays_code: Option<String>,
    pub(crate) pays_libelle: Option<String>,
    pub(crate) activite_principale: Option<String>,
    pub(crate) nomenclature_activite: Option<String>,
    pub(crate) tranche_effectifs: Option<String>,
    pub(crate) annee_effectifs: Option<i32>,
    pub(crate) raw: Option<serde_json::Value>,
}

impl SireneRecord for Establishment {
    const KIND: EntityKind = EntityKind::Establishment;
    const TABLE: &'static str = "sirene.etablissement";
    const KEY_COLUMN: &'static str = "siret";
    const COLUMNS: &'static [&'static str] = &[
        "siret",
        "siren",
        "nic",
        "etablissement_siege",
        "etat_administratif",
        "date_creation",
        "date_debut",
        "date_dernier_traitement",
        "enseigne1",
        "enseigne2",
        "enseigne3",
        "denomination_usuelle",
        "complement_adresse",
        "numero_voie",
        "type_voie",
        "libelle_voie",
        "code_postal",
        "libelle_commune",
        "code_commune",
        "code_cedex",
        "libelle_cedex",
        "pays_code",
        "pays_libelle",
        "activite_principale",
        "nomenclature_activite",
        "tranche_effectifs",
        "annee_effectifs",
        "raw",
    ];
    const SOURCE_COLUMNS: &'static [&'static str] = &[
        "siren",
        "nic",
        "siret",
        "etablissementSiege",
        "etatAdministratifEtablissement",
        "dateCreationEtablissement",
        "dateDebut",
        "dateDernierTraitementEtablissement",
        "enseigne1Etablissement",
        "enseigne2Etablissement",
        "enseigne3Etablissement",
        "denominationUsuelleEtablissement",
        "complementAdresseEtablissement",
        "numeroVoieEtablissement",
        "typeVoieEtablissement",
        "libelleVoieEtablissement",
        "codePostalEtablissement",
        "libelleCommuneEtablissement",
        "codeCommuneEtablissement",
        "codeCedexEtablissement",
        "libelleCedexEtablissement",
        "codePaysEtrangerEtablissement",
        "libellePaysEtrangerEtablissement",
        "activitePrincipaleEtablissement",
        "nomenclatureActiviteEtablissement",
        "trancheEffectifsEtablissement",
        "anneeEffectifsEtablissement",
    ];

    fn key(&self) -> &str {
        &self.siret
    }

    fn push_binds<'args>(&'args self, mut row: Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.siret)
            .push_bind(&self.siren)
            .push_bind(&self.nic)
            .push_bind(self.etablissement_siege)
            .push_bind(&self.etat_administratif)
            .push_bind(self.date_creation)
            .push_bind(self.date_debut)
            .push_bind(self.date_dernier_traitement)
            .push_bind(&self.enseigne1)
            .push_bind(&self.enseigne2)
            .push_bind(&self.enseigne3)
            .push_bind(&self.denomination_usuelle)
            .push_bind(&self.complement_adresse)
            .push_bind(&self.numero_voie)
            .push_bind(&self.type_voie)
            .push_bind(&self.libelle_voie)
            .push_bind(&self.code_postal)
            .push_bind(&self.libelle_commune)
            .push_bind(&self.code_commune)
            .push_bind(&self.code_cedex)
            .push_bind(&self.libelle_cedex)
            .push_bind(&self.pays_code)
            .push_bind(&self.pays_libelle)
            .push_bind(&self.activite_principale)
            .push_bind(&self.nomenclature_activite)
            .push_bind(&self.tranche_effectifs)
            .push_bind(self.annee_effectifs)
            .push_bind(&self.raw);
    }

    /// SIRET alone is enough, otherwise both SIREN and NIC are needed
    fn missing_key_column(columns: &ColumnMap) -> Option<&'static str> {
        if columns.contains("siret") || (columns.contains("siren") && columns.contains("nic")) {
            None
        } else {
            Some("siret")
        }
    }
}
